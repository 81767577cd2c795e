//! Generic OpenAI-compatible provider.
//! Talks to the Responses API first and falls back to `/chat/completions`
//! when the endpoint answers 404, which covers proxies and self-hosted
//! gateways that only implement the older API.

use crate::providers::traits::{CompletionRequest, Provider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A provider that speaks the OpenAI-compatible Responses and chat completions APIs.
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build the full URL for chat completions, detecting if base_url already includes the path.
    fn chat_completions_url(&self) -> String {
        if self.path_ends_with("/chat/completions") {
            return self.base_url.clone();
        }

        // A configured responses endpoint has a sibling chat endpoint.
        if let Some(prefix) = self.base_url.strip_suffix("/responses") {
            return format!("{prefix}/chat/completions");
        }

        if self.has_explicit_api_path() {
            format!("{}/chat/completions", self.base_url)
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }

    fn path_ends_with(&self, suffix: &str) -> bool {
        if let Ok(url) = reqwest::Url::parse(&self.base_url) {
            return url.path().trim_end_matches('/').ends_with(suffix);
        }

        self.base_url.trim_end_matches('/').ends_with(suffix)
    }

    fn has_explicit_api_path(&self) -> bool {
        let Ok(url) = reqwest::Url::parse(&self.base_url) else {
            return false;
        };

        let path = url.path().trim_end_matches('/');
        !path.is_empty() && path != "/"
    }

    /// Build the full URL for responses API, detecting if base_url already includes the path.
    fn responses_url(&self) -> String {
        if self.path_ends_with("/responses") {
            return self.base_url.clone();
        }

        let normalized_base = self.base_url.trim_end_matches('/');

        // If chat endpoint is explicitly configured, derive sibling responses endpoint.
        if let Some(prefix) = normalized_base.strip_suffix("/chat/completions") {
            return format!("{prefix}/responses");
        }

        // An explicit API path (e.g. /v1, /openai) already carries the version.
        if self.has_explicit_api_path() {
            format!("{normalized_base}/responses")
        } else {
            format!("{normalized_base}/v1/responses")
        }
    }

    /// JSON POST to `url` with `Authorization: Bearer <key>`.
    fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        self.client.post(url).bearer_auth(api_key).json(body)
    }

    async fn complete_via_chat(
        &self,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: request.model.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.instructions.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.input.to_string(),
                },
            ],
            temperature: request.temperature,
            max_tokens: Some(request.max_output_tokens),
            stream: Some(false),
        };

        let response = self
            .post_json(&self.chat_completions_url(), &body, api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.name, response).await);
        }

        let chat_response: ApiChatResponse = response.json().await?;
        extract_chat_text(chat_response)
            .ok_or_else(|| anyhow::anyhow!("No response from {}", self.name))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<ResponsesInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ResponsesInput {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<ResponsesOutput>,
    #[serde(default)]
    output_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutput {
    #[serde(default)]
    content: Vec<ResponsesContent>,
}

#[derive(Debug, Deserialize)]
struct ResponsesContent {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

fn first_nonempty(text: Option<&str>) -> Option<String> {
    text.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn extract_responses_text(response: ResponsesResponse) -> Option<String> {
    if let Some(text) = first_nonempty(response.output_text.as_deref()) {
        return Some(text);
    }

    for item in &response.output {
        for content in &item.content {
            if content.kind.as_deref() == Some("output_text") {
                if let Some(text) = first_nonempty(content.text.as_deref()) {
                    return Some(text);
                }
            }
        }
    }

    for item in &response.output {
        for content in &item.content {
            if let Some(text) = first_nonempty(content.text.as_deref()) {
                return Some(text);
            }
        }
    }

    None
}

fn extract_chat_text(response: ApiChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .find_map(|c| first_nonempty(c.message.content.as_deref()))
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn complete(&self, request: &CompletionRequest<'_>) -> anyhow::Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "{} API key not set. Set api_key in config.toml or the OPENAI_API_KEY env var.",
                self.name
            )
        })?;

        let body = ResponsesRequest {
            model: request.model.to_string(),
            input: vec![ResponsesInput {
                role: "user".to_string(),
                content: request.input.to_string(),
            }],
            instructions: Some(request.instructions.to_string()),
            temperature: request.temperature,
            max_output_tokens: Some(request.max_output_tokens),
            stream: Some(false),
        };

        let response = self
            .post_json(&self.responses_url(), &body, api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();

            if status == reqwest::StatusCode::NOT_FOUND {
                tracing::debug!(
                    provider = %self.name,
                    "responses endpoint not found, falling back to chat completions"
                );
                return self
                    .complete_via_chat(api_key, request)
                    .await
                    .map_err(|chat_err| {
                        anyhow::anyhow!(
                            "{} API error ({status}): responses unavailable; chat completions fallback failed: {chat_err}",
                            self.name
                        )
                    });
            }

            return Err(super::api_error(&self.name, response).await);
        }

        let responses: ResponsesResponse = response.json().await?;

        extract_responses_text(responses)
            .ok_or_else(|| anyhow::anyhow!("No response from {} Responses API", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
