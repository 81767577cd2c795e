pub mod schema;

pub use schema::{
    AssistantConfig, CatalogConfig, ChannelsConfig, Config, GatewayConfig, MediaConfig,
    SessionsConfig, WhatsAppConfig,
};
