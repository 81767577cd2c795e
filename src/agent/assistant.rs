use crate::agent::prompt::{build_instructions, PromptContext};
use crate::catalog::{render_catalog, CatalogReader};
use crate::channels::{Channel, InboundMessage};
use crate::config::Config;
use crate::providers::{CompletionRequest, Provider};
use crate::security::redact;
use crate::sessions::{SessionStore, Speaker};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

/// Model and persona settings for the assistant.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub persona_name: String,
    pub store_name: String,
    pub extra_instructions: Option<String>,
    pub fallback_reply: String,
}

impl AssistantSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config
                .default_model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".into()),
            temperature: config.default_temperature,
            max_output_tokens: config.max_output_tokens,
            persona_name: config.assistant.persona_name.clone(),
            store_name: config.assistant.store_name.clone(),
            extra_instructions: config.assistant.extra_instructions.clone(),
            fallback_reply: config.assistant.fallback_reply.clone(),
        }
    }
}

/// Turns one inbound customer message into a catalog-grounded sales reply.
pub struct SalesAssistant {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn CatalogReader>,
    provider: Arc<dyn Provider>,
    settings: AssistantSettings,
}

impl SalesAssistant {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn CatalogReader>,
        provider: Arc<dyn Provider>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            sessions,
            catalog,
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn speaker(&self) -> Speaker {
        Speaker::Assistant(self.settings.persona_name.clone())
    }

    /// Produce a reply for `text` in conversation `conversation_id`.
    ///
    /// The user turn is recorded before the provider call. The assistant turn
    /// is recorded only when a non-empty reply comes back.
    pub async fn handle_message(&self, conversation_id: &str, text: &str) -> Result<String> {
        let now = Utc::now();
        let prior = self.sessions.get_or_create(conversation_id, now);
        self.sessions
            .record_turn(conversation_id, &Speaker::User, text, now);

        let products = self
            .catalog
            .fetch_all()
            .await
            .context("Failed to load product catalog")?;

        let instructions = build_instructions(PromptContext {
            persona_name: &self.settings.persona_name,
            store_name: &self.settings.store_name,
            extra_instructions: self.settings.extra_instructions.as_deref(),
            catalog_json: render_catalog(&products),
            history: prior.history,
        });

        let request = CompletionRequest {
            instructions: &instructions,
            input: text,
            model: &self.settings.model,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let reply = match self.provider.complete(&request).await {
            Ok(reply) => {
                crate::health::mark_component_ok("provider");
                reply
            }
            Err(e) => {
                crate::health::mark_component_error("provider", &e);
                return Err(e);
            }
        };

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            anyhow::bail!("{} returned an empty reply", self.provider.name());
        }

        self.sessions
            .record_turn(conversation_id, &self.speaker(), &reply, Utc::now());

        tracing::debug!(
            conversation = %redact(conversation_id),
            products = products.len(),
            reply_chars = reply.chars().count(),
            "Generated sales reply"
        );

        Ok(reply)
    }

    /// Handle one channel message end to end: reply, or send the fallback on failure.
    pub async fn run_inbound(&self, channel: &dyn Channel, message: &InboundMessage) {
        if message.content.trim().is_empty() {
            tracing::debug!("Ignoring empty inbound message {}", message.id);
            return;
        }

        let conversation = redact(&message.sender);
        let reply = match self.handle_message(&message.sender, &message.content).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation,
                    channel = channel.name(),
                    "Assistant failed to reply: {}",
                    crate::providers::sanitize_api_error(&format!("{e:#}"))
                );
                self.settings.fallback_reply.clone()
            }
        };

        if let Err(e) = channel.send(&message.reply_target, &reply).await {
            crate::health::mark_component_error(channel.name(), &e);
            tracing::error!(
                conversation = %conversation,
                channel = channel.name(),
                "Failed to deliver reply: {e}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;
    use crate::sessions::InMemorySessionStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct StaticCatalog(Vec<Product>);

    #[async_trait]
    impl CatalogReader for StaticCatalog {
        async fn fetch_all(&self) -> Result<Vec<Product>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    struct FailingCatalog;

    #[async_trait]
    impl CatalogReader for FailingCatalog {
        async fn fetch_all(&self) -> Result<Vec<Product>> {
            anyhow::bail!("database locked")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Replies with a fixed script and records every request it receives.
    struct ScriptedProvider {
        reply: Result<String, String>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedProvider {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn err(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
            self.seen
                .lock()
                .push((request.instructions.to_string(), request.input.to_string()));
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, recipient: &str, text: &str) -> Result<()> {
            if self.fail {
                anyhow::bail!("network down");
            }
            self.sent.lock().push((recipient.into(), text.into()));
            Ok(())
        }
    }

    fn product() -> Product {
        Product {
            id: 1,
            name: "Guide Vendre sur WhatsApp".into(),
            description: "Ebook".into(),
            price: 5000.0,
            currency: "XAF".into(),
            image_url: None,
            category: None,
            tags: vec![],
            testimonials: vec![],
            ebook: None,
            training: None,
            files: vec![],
        }
    }

    fn settings() -> AssistantSettings {
        AssistantSettings::from_config(&Config::default())
    }

    fn assistant(
        store: Arc<InMemorySessionStore>,
        provider: Arc<ScriptedProvider>,
    ) -> SalesAssistant {
        SalesAssistant::new(
            store,
            Arc::new(StaticCatalog(vec![product()])),
            provider,
            settings(),
        )
    }

    fn inbound(sender: &str, content: &str) -> InboundMessage {
        InboundMessage {
            id: "wamid.1".into(),
            sender: sender.into(),
            reply_target: sender.into(),
            content: content.into(),
            channel: "whatsapp".into(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn successful_reply_records_both_turns() {
        let store = Arc::new(InMemorySessionStore::new());
        let provider = ScriptedProvider::ok("  Bonjour! Le guide coûte 5000 XAF.  ");
        let assistant = assistant(store.clone(), provider.clone());

        let reply = assistant
            .handle_message("237600000000@c.us", "Bonjour")
            .await
            .unwrap();

        assert_eq!(reply, "Bonjour! Le guide coûte 5000 XAF.");
        assert_eq!(
            store.get("237600000000@c.us").unwrap().history,
            vec![
                "User: Bonjour".to_string(),
                "Victor: Bonjour! Le guide coûte 5000 XAF.".to_string()
            ]
        );

        let seen = provider.seen.lock();
        let (instructions, input) = &seen[0];
        assert_eq!(input, "Bonjour");
        assert!(instructions.contains("Guide Vendre sur WhatsApp"));
        assert!(instructions.contains("(no previous messages)"));
    }

    #[tokio::test]
    async fn prompt_carries_prior_turns_but_not_current_message() {
        let store = Arc::new(InMemorySessionStore::new());
        let provider = ScriptedProvider::ok("reply");
        let assistant = assistant(store.clone(), provider.clone());

        assistant.handle_message("c1", "first").await.unwrap();
        assistant.handle_message("c1", "second").await.unwrap();

        let seen = provider.seen.lock();
        let (instructions, input) = &seen[1];
        assert_eq!(input, "second");
        assert!(instructions.contains("User: first\nVictor: reply"));
        assert!(!instructions.contains("User: second"));
    }

    #[tokio::test]
    async fn provider_failure_leaves_no_assistant_turn() {
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant(store.clone(), ScriptedProvider::err("upstream 500"));

        let err = assistant.handle_message("c2", "hello").await.unwrap_err();
        assert!(err.to_string().contains("upstream 500"));
        assert_eq!(store.get("c2").unwrap().history, vec!["User: hello"]);
    }

    #[tokio::test]
    async fn empty_reply_is_an_error_and_not_recorded() {
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant(store.clone(), ScriptedProvider::ok("   "));

        assert!(assistant.handle_message("c3", "hello").await.is_err());
        assert_eq!(store.get("c3").unwrap().history, vec!["User: hello"]);
    }

    #[tokio::test]
    async fn catalog_failure_propagates_without_calling_provider() {
        let store = Arc::new(InMemorySessionStore::new());
        let provider = ScriptedProvider::ok("unused");
        let assistant = SalesAssistant::new(
            store.clone(),
            Arc::new(FailingCatalog),
            provider.clone(),
            settings(),
        );

        let err = assistant.handle_message("c4", "hi").await.unwrap_err();
        assert!(format!("{err:#}").contains("database locked"));
        assert!(provider.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn run_inbound_sends_reply_to_sender() {
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant(store, ScriptedProvider::ok("Voici nos produits"));
        let channel = RecordingChannel::default();

        assistant
            .run_inbound(&channel, &inbound("+237600000000", "catalogue?"))
            .await;

        assert_eq!(
            channel.sent.lock().as_slice(),
            &[("+237600000000".to_string(), "Voici nos produits".to_string())]
        );
    }

    #[tokio::test]
    async fn run_inbound_sends_fallback_on_failure() {
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant(store, ScriptedProvider::err("timeout"));
        let channel = RecordingChannel::default();

        assistant
            .run_inbound(&channel, &inbound("+237600000001", "prix?"))
            .await;

        let sent = channel.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, settings().fallback_reply);
    }

    #[tokio::test]
    async fn run_inbound_ignores_blank_messages() {
        let store = Arc::new(InMemorySessionStore::new());
        let provider = ScriptedProvider::ok("unused");
        let assistant = assistant(store.clone(), provider.clone());
        let channel = RecordingChannel::default();

        assistant.run_inbound(&channel, &inbound("+1", "   ")).await;

        assert!(channel.sent.lock().is_empty());
        assert!(provider.seen.lock().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn run_inbound_survives_send_failure() {
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant(store.clone(), ScriptedProvider::ok("hi"));
        let channel = RecordingChannel {
            fail: true,
            ..RecordingChannel::default()
        };

        assistant.run_inbound(&channel, &inbound("+2", "hello")).await;
        assert_eq!(store.get("+2").unwrap().history.len(), 2);
    }
}
