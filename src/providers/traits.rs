use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One completion call: a system-level instruction block plus the user's text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest<'a> {
    pub instructions: &'a str,
    pub input: &'a str,
    pub model: &'a str,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate a reply for `request`. Returns the trimmed reply text.
    async fn complete(&self, request: &CompletionRequest<'_>) -> anyhow::Result<String>;

    /// Provider identifier used in logs and status output.
    fn name(&self) -> &str;
}
