use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A text message received from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-assigned message id.
    pub id: String,
    /// Sender address, also used as the conversation id.
    pub sender: String,
    /// Address replies should be sent to.
    pub reply_target: String,
    pub content: String,
    pub channel: String,
    /// Unix seconds reported by the channel.
    pub timestamp: u64,
}

/// Outbound messaging surface (WhatsApp and test doubles).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Send a text message to `recipient`.
    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()>;

    /// Lightweight readiness check. Defaults to healthy.
    async fn health_check(&self) -> bool {
        true
    }
}
