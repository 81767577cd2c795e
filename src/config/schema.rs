use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level shopwise configuration, loaded from `config.toml`.
///
/// Resolution order: `SHOPWISE_CONFIG_DIR` env → `~/.shopwise/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the completion provider. Overridden by `SHOPWISE_API_KEY` or `API_KEY` env vars.
    pub api_key: Option<String>,
    /// Base URL override for the provider API (e.g. an OpenAI-compatible proxy).
    pub api_url: Option<String>,
    /// Provider ID (`"openai"` or `"custom:<url>"`). Default: `"openai"`.
    pub default_provider: Option<String>,
    /// Model used for sales replies. Default: `"gpt-4o-mini"`.
    pub default_model: Option<String>,
    /// Sampling temperature (0.0–2.0). Default: `0.7`.
    pub default_temperature: f64,
    /// Upper bound on generated tokens per reply. Default: `500`.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sales assistant persona and fallback behavior (`[assistant]`).
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Conversation session limits and expiry (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Gateway server configuration: host, port, API tokens, upload limits (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Product catalog database (`[catalog]`).
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Uploaded file storage (`[media]`).
    #[serde(default)]
    pub media: MediaConfig,

    /// Channel configurations (`[channels_config]`).
    #[serde(default)]
    pub channels_config: ChannelsConfig,
}

fn default_max_output_tokens() -> u32 {
    500
}

// ── Assistant ────────────────────────────────────────────────────

/// Sales assistant configuration (`[assistant]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssistantConfig {
    /// Name the assistant introduces itself with; also the history speaker label.
    #[serde(default = "default_persona_name")]
    pub persona_name: String,
    /// Store name mentioned in the instructions.
    #[serde(default = "default_store_name")]
    pub store_name: String,
    /// Extra instructions appended to the built-in sales rules.
    #[serde(default)]
    pub extra_instructions: Option<String>,
    /// Reply sent to the customer when the completion provider fails.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

fn default_persona_name() -> String {
    "Victor".into()
}

fn default_store_name() -> String {
    "our store".into()
}

fn default_fallback_reply() -> String {
    "Sorry, I can't answer right now. Please try again in a moment.".into()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            persona_name: default_persona_name(),
            store_name: default_store_name(),
            extra_instructions: None,
            fallback_reply: default_fallback_reply(),
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Session store configuration (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Maximum turns retained per conversation. Default: `20`.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Idle time after which a conversation is forgotten. Default: `86400` (24h).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How often idle conversations are swept. Default: `3600` (1h).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Optional cap on simultaneously tracked conversations. Unset means no cap.
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

fn default_max_history() -> usize {
    crate::sessions::DEFAULT_MAX_HISTORY
}

fn default_idle_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_sessions: None,
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Gateway port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Bearer tokens accepted by authenticated routes. Empty disables auth.
    #[serde(default)]
    pub api_tokens: Vec<String>,
    /// Maximum accepted upload body in bytes (default: 10 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            api_tokens: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Catalog / media ──────────────────────────────────────────────

/// Product catalog configuration (`[catalog]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CatalogConfig {
    /// SQLite database path. Relative paths resolve against the workspace.
    /// Default: `<workspace>/catalog.db`.
    #[serde(default)]
    pub db_path: Option<String>,
}

/// Upload storage configuration (`[media]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MediaConfig {
    /// Directory for uploaded files. Relative paths resolve against the workspace.
    /// Default: `<workspace>/uploads`.
    #[serde(default)]
    pub upload_dir: Option<String>,
}

// ── Channels ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChannelsConfig {
    /// WhatsApp channel configuration (Cloud API).
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
}

/// WhatsApp channel configuration (Cloud API).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WhatsAppConfig {
    /// Access token from Meta Business Suite
    #[serde(default)]
    pub access_token: Option<String>,
    /// Phone number ID from Meta Business API
    #[serde(default)]
    pub phone_number_id: Option<String>,
    /// Webhook verify token (you define this, Meta sends it back for verification)
    #[serde(default)]
    pub verify_token: Option<String>,
    /// App secret from Meta Business Suite (for webhook signature verification)
    /// Can also be set via `SHOPWISE_WHATSAPP_APP_SECRET` environment variable
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Allowed phone numbers (E.164 format: +1234567890) or "*" for all
    #[serde(default)]
    pub allowed_numbers: Vec<String>,
    /// Graph API base URL. Default: `https://graph.facebook.com/v21.0`.
    #[serde(default = "default_whatsapp_api_base_url")]
    pub api_base_url: String,
}

fn default_whatsapp_api_base_url() -> String {
    "https://graph.facebook.com/v21.0".into()
}

impl WhatsAppConfig {
    /// Check if the fields required to send and receive are present
    pub fn is_complete(&self) -> bool {
        self.phone_number_id.is_some() && self.access_token.is_some() && self.verify_token.is_some()
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            verify_token: None,
            app_secret: None,
            allowed_numbers: Vec::new(),
            api_base_url: default_whatsapp_api_base_url(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let shopwise_dir = home.join(".shopwise");

        Self {
            workspace_dir: shopwise_dir.join("workspace"),
            config_path: shopwise_dir.join("config.toml"),
            api_key: None,
            api_url: None,
            default_provider: Some("openai".to_string()),
            default_model: Some("gpt-4o-mini".to_string()),
            default_temperature: 0.7,
            max_output_tokens: default_max_output_tokens(),
            assistant: AssistantConfig::default(),
            sessions: SessionsConfig::default(),
            gateway: GatewayConfig::default(),
            catalog: CatalogConfig::default(),
            media: MediaConfig::default(),
            channels_config: ChannelsConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".shopwise"))
}

fn resolve_config_dir() -> Result<PathBuf> {
    if let Ok(custom_config_dir) = std::env::var("SHOPWISE_CONFIG_DIR") {
        let custom_config_dir = custom_config_dir.trim();
        if !custom_config_dir.is_empty() {
            return Ok(PathBuf::from(custom_config_dir));
        }
    }
    default_config_dir()
}

fn resolve_in_workspace(workspace_dir: &Path, configured: Option<&str>, default: &str) -> PathBuf {
    match configured.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => {
            let path = PathBuf::from(raw);
            if path.is_absolute() {
                path
            } else {
                workspace_dir.join(path)
            }
        }
        None => workspace_dir.join(default),
    }
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = resolve_config_dir()?;
        Self::load_or_init_in(&config_dir).await
    }

    /// Load `config.toml` from `config_dir`, writing defaults on first run.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");
        let workspace_dir = config_dir.join("workspace");

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;
        fs::create_dir_all(&workspace_dir)
            .await
            .context("Failed to create workspace directory")?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir;
            config.save().await?;

            // Restrict permissions on newly created config file (may contain API keys)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            // Warn if config file is world-readable (may contain API keys)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            workspace = %config.workspace_dir.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Absolute path of the catalog database.
    pub fn catalog_db_path(&self) -> PathBuf {
        resolve_in_workspace(&self.workspace_dir, self.catalog.db_path.as_deref(), "catalog.db")
    }

    /// Absolute path of the upload directory.
    pub fn upload_dir(&self) -> PathBuf {
        resolve_in_workspace(&self.workspace_dir, self.media.upload_dir.as_deref(), "uploads")
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Called after TOML deserialization and env-override application to catch
    /// obviously invalid values early instead of failing at arbitrary runtime points.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.max_upload_bytes == 0 {
            anyhow::bail!("gateway.max_upload_bytes must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be between 0.0 and 2.0 (got {})",
                self.default_temperature
            );
        }
        if self.max_output_tokens == 0 {
            anyhow::bail!("max_output_tokens must be greater than 0");
        }

        // Sessions
        if self.sessions.max_history == 0 {
            anyhow::bail!("sessions.max_history must be greater than 0");
        }
        if self.sessions.sweep_interval_secs == 0 {
            anyhow::bail!("sessions.sweep_interval_secs must be greater than 0");
        }
        if self.sessions.idle_timeout_secs == 0 {
            anyhow::bail!("sessions.idle_timeout_secs must be greater than 0");
        }

        if self.assistant.persona_name.trim().is_empty() {
            anyhow::bail!("assistant.persona_name must not be empty");
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API Key: SHOPWISE_API_KEY or API_KEY (generic)
        if let Ok(key) = std::env::var("SHOPWISE_API_KEY").or_else(|_| std::env::var("API_KEY")) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Ok(provider) = std::env::var("SHOPWISE_PROVIDER") {
            if !provider.is_empty() {
                self.default_provider = Some(provider);
            }
        }

        // Model: SHOPWISE_MODEL or MODEL
        if let Ok(model) = std::env::var("SHOPWISE_MODEL").or_else(|_| std::env::var("MODEL")) {
            if !model.is_empty() {
                self.default_model = Some(model);
            }
        }

        // Gateway port: SHOPWISE_GATEWAY_PORT or PORT
        if let Ok(port_str) =
            std::env::var("SHOPWISE_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: SHOPWISE_GATEWAY_HOST or HOST
        if let Ok(host) = std::env::var("SHOPWISE_GATEWAY_HOST").or_else(|_| std::env::var("HOST"))
        {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }

        // Temperature: SHOPWISE_TEMPERATURE
        if let Ok(temp_str) = std::env::var("SHOPWISE_TEMPERATURE") {
            if let Ok(temp) = temp_str.parse::<f64>() {
                if (0.0..=2.0).contains(&temp) {
                    self.default_temperature = temp;
                }
            }
        }

        // WhatsApp secrets: only applied when the channel is configured
        if let Some(whatsapp) = self.channels_config.whatsapp.as_mut() {
            if let Ok(secret) = std::env::var("SHOPWISE_WHATSAPP_APP_SECRET") {
                if !secret.trim().is_empty() {
                    whatsapp.app_secret = Some(secret.trim().to_string());
                }
            }
            if let Ok(token) = std::env::var("SHOPWISE_WHATSAPP_ACCESS_TOKEN") {
                if !token.trim().is_empty() {
                    whatsapp.access_token = Some(token.trim().to_string());
                }
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to create config backup before atomic replace: {}",
                        backup_path.display()
                    )
                })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            if had_existing_config && backup_path.exists() {
                fs::copy(&backup_path, &self.config_path)
                    .await
                    .context("Failed to restore config backup")?;
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path).await;
        }

        Ok(())
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
