//! Security helpers: secret redaction for logs and gateway bearer-token checks.

/// Redact sensitive values for safe logging. Shows first 4 chars + "***" suffix.
pub fn redact(value: &str) -> String {
    match value.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &value[..idx]),
        None => "***".to_string(),
    }
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accepted bearer tokens for authenticated gateway routes.
///
/// An empty token list disables authentication entirely.
#[derive(Debug, Clone, Default)]
pub struct TokenGuard {
    tokens: Vec<String>,
}

impl TokenGuard {
    pub fn new(tokens: &[String]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn require_auth(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Check `token` against every configured token in constant time per comparison.
    pub fn is_authenticated(&self, token: &str) -> bool {
        if !self.require_auth() {
            return true;
        }
        self.tokens
            .iter()
            .fold(false, |ok, t| constant_time_eq(t.as_bytes(), token.as_bytes()) | ok)
    }
}
