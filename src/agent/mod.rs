//! The WhatsApp sales assistant: session bookkeeping, catalog-grounded
//! instructions and the provider call for each inbound message.

pub mod assistant;
pub mod prompt;
pub mod traits;

pub use assistant::{AssistantSettings, SalesAssistant};
pub use prompt::{build_instructions, PromptContext, SalesPromptBuilder};
pub use traits::PromptSection;

use crate::catalog::{create_catalog, CatalogReader};
use crate::config::Config;
use crate::providers::{create_provider, Provider};
use crate::sessions::SessionStore;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Build the assistant from config: SQLite catalog plus the configured provider.
pub fn create_assistant(config: &Config, sessions: Arc<dyn SessionStore>) -> Result<SalesAssistant> {
    let catalog: Arc<dyn CatalogReader> =
        Arc::new(create_catalog(config).context("Failed to open product catalog")?);

    let provider_name = config.default_provider.as_deref().unwrap_or("openai");
    let provider: Arc<dyn Provider> = Arc::from(create_provider(
        provider_name,
        config.api_key.as_deref(),
        config.api_url.as_deref(),
    )?);

    Ok(SalesAssistant::new(
        sessions,
        catalog,
        provider,
        AssistantSettings::from_config(config),
    ))
}
