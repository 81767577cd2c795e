//! Provider subsystem for completion backends.
//!
//! Each provider implements the [`Provider`] trait defined in [`traits`] and is
//! selected by [`create_provider`] from its config key.

pub mod compatible;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use traits::{CompletionRequest, Provider};

const MAX_API_ERROR_CHARS: usize = 200;

/// Base URL used by the `openai` provider when no override is configured.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
///
/// Redacts tokens with prefixes like `sk-`, `sess-`, `EAA` (Meta Graph tokens)
/// and `Bearer ` payloads.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 4] = ["sk-", "sess-", "EAA", "Bearer "];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}

/// Resolve API key for a provider from config and environment variables.
fn resolve_provider_credential(name: &str, credential_override: Option<&str>) -> Option<String> {
    if let Some(raw_override) = credential_override {
        let trimmed_override = raw_override.trim();
        if !trimmed_override.is_empty() {
            return Some(trimmed_override.to_owned());
        }
    }

    let provider_env_candidates: Vec<&str> = match name {
        "openai" => vec!["OPENAI_API_KEY"],
        _ => vec![],
    };

    for env_var in provider_env_candidates
        .into_iter()
        .chain(["SHOPWISE_API_KEY", "API_KEY"])
    {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Factory: create the right provider from config with optional custom base URL.
///
/// `name` is `"openai"` or `"custom:<base-url>"`. For `openai`, `api_url`
/// overrides the default endpoint.
pub fn create_provider(
    name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let key = resolve_provider_credential(name, api_key);
    let api_url = api_url.map(str::trim).filter(|u| !u.is_empty());

    match name {
        "openai" => Ok(Box::new(OpenAiCompatibleProvider::new(
            "openai",
            api_url.unwrap_or(OPENAI_BASE_URL),
            key.as_deref(),
        ))),
        custom if custom.starts_with("custom:") => {
            let base_url = custom.trim_start_matches("custom:").trim();
            if base_url.is_empty() {
                anyhow::bail!("Custom provider requires a URL, e.g. custom:https://llm.example.com/v1");
            }
            let parsed = reqwest::Url::parse(base_url)
                .map_err(|e| anyhow::anyhow!("Invalid custom provider URL {base_url:?}: {e}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("Custom provider URL must use http or https: {base_url}");
            }
            Ok(Box::new(OpenAiCompatibleProvider::new(
                "custom",
                base_url,
                key.as_deref(),
            )))
        }
        _ => anyhow::bail!(
            "Unknown provider: {name}. Use \"openai\" or \"custom:<url>\"."
        ),
    }
}

/// Information about a supported provider for display purposes.
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"openai"`)
    pub name: &'static str,
    /// Human-readable display name
    pub display_name: &'static str,
}

/// Return the list of known providers for display in `shopwise status`.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "openai",
            display_name: "OpenAI",
        },
        ProviderInfo {
            name: "custom:<url>",
            display_name: "OpenAI-compatible endpoint",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_openai() {
        let p = create_provider("openai", Some("provider-test-credential"), None).unwrap();
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn factory_openai_with_url_override() {
        assert!(create_provider("openai", Some("k"), Some("https://proxy.example.com/v1")).is_ok());
    }

    #[test]
    fn factory_custom_url() {
        let p = create_provider("custom:https://llm.example.com/v1", Some("k"), None).unwrap();
        assert_eq!(p.name(), "custom");
    }

    #[test]
    fn factory_custom_requires_url() {
        let err = create_provider("custom:", Some("k"), None)
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("requires a URL"));
    }

    #[test]
    fn factory_custom_rejects_non_http_scheme() {
        assert!(create_provider("custom:ftp://llm.example.com", Some("k"), None).is_err());
    }

    #[test]
    fn factory_unknown_provider_errors() {
        let p = create_provider("nonexistent", None, None);
        assert!(p.is_err());
        let msg = p.err().unwrap().to_string();
        assert!(msg.contains("Unknown provider"));
    }

    #[test]
    fn factory_empty_name_errors() {
        assert!(create_provider("", None, None).is_err());
    }

    #[test]
    fn listed_providers_have_unique_ids() {
        let providers = list_providers();
        let mut ids = std::collections::HashSet::new();
        for provider in providers {
            assert!(
                ids.insert(provider.name),
                "Duplicate provider id: {}",
                provider.name
            );
        }
    }

    // ── API error sanitization ───────────────────────────────

    #[test]
    fn sanitize_scrubs_sk_prefix() {
        let input = "request failed: sk-1234567890abcdef";
        let out = sanitize_api_error(input);
        assert!(!out.contains("sk-1234567890abcdef"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn sanitize_scrubs_multiple_prefixes() {
        let input = "keys sk-abcdef EAAB123xyz Bearer tok123";
        let out = sanitize_api_error(input);
        assert!(!out.contains("sk-abcdef"));
        assert!(!out.contains("EAAB123xyz"));
        assert!(!out.contains("tok123"));
    }

    #[test]
    fn sanitize_truncates_long_error() {
        let long = "a".repeat(400);
        let result = sanitize_api_error(&long);
        assert!(result.len() <= 203);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let result = sanitize_api_error(&long);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_no_secret_no_change() {
        let input = "simple upstream timeout";
        let result = sanitize_api_error(input);
        assert_eq!(result, input);
    }

    #[test]
    fn scrub_ignores_bare_prefix() {
        assert_eq!(scrub_secret_patterns("ask- me"), "ask- me");
    }

    #[test]
    fn resolve_provider_credential_prefers_explicit_argument() {
        let resolved = resolve_provider_credential("openai", Some("  explicit-key  "));
        assert_eq!(resolved, Some("explicit-key".to_string()));
    }
}
