//! Axum HTTP gateway: uploads, file retrieval, outbound messages and the
//! WhatsApp webhook.

pub mod api;

use crate::agent::{create_assistant, SalesAssistant};
use crate::channels::{create_whatsapp_channel, Channel, WhatsAppChannel};
use crate::config::Config;
use crate::media::{create_media_store, MediaStore};
use crate::security::TokenGuard;
use crate::sessions::{create_session_store, SessionStore, SessionSweeper};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tower_http::timeout::TimeoutLayer;

/// Body limit for JSON and webhook routes.
const MAX_JSON_BODY_BYTES: usize = 64 * 1024;

/// Headroom on top of `max_upload_bytes` for multipart boundaries and headers.
const MULTIPART_OVERHEAD_BYTES: usize = 16 * 1024;

/// How long shutdown waits for in-flight assistant replies.
const REPLY_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub assistant: Arc<SalesAssistant>,
    pub sessions: Arc<dyn SessionStore>,
    pub media: Arc<dyn MediaStore>,
    /// Webhook side of the WhatsApp channel (verification and parsing).
    pub whatsapp: Option<Arc<WhatsAppChannel>>,
    pub whatsapp_app_secret: Option<Arc<str>>,
    /// Channel used for `/send-message` and assistant replies.
    pub outbound: Option<Arc<dyn Channel>>,
    pub auth: Arc<TokenGuard>,
    /// Webhook reply tasks, drained on shutdown.
    pub tasks: TaskTracker,
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state
        .config
        .gateway
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let timeout = Duration::from_secs(state.config.gateway.request_timeout_secs.max(1));

    Router::new()
        .route("/health", get(api::handle_health))
        .route(
            "/upload",
            post(api::handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files", get(api::handle_list_files))
        .route(
            "/files/{name}",
            get(api::handle_get_file).delete(api::handle_delete_file),
        )
        .route("/send-message", post(api::handle_send_message))
        .route(
            "/whatsapp",
            get(api::handle_whatsapp_verify).post(api::handle_whatsapp_message),
        )
        .route("/api/status", get(api::handle_api_status))
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .with_state(state)
}

/// Wire every component from `config` into an [`AppState`].
pub fn build_state(config: Config) -> Result<AppState> {
    let sessions: Arc<dyn SessionStore> = Arc::new(create_session_store(&config.sessions));

    let assistant = Arc::new(create_assistant(&config, sessions.clone())?);

    let media: Arc<dyn MediaStore> = Arc::new(create_media_store(
        &config.upload_dir(),
        config.gateway.max_upload_bytes as u64,
    ));

    let whatsapp = create_whatsapp_channel(&config.channels_config).map(Arc::new);
    let whatsapp_app_secret = config
        .channels_config
        .whatsapp
        .as_ref()
        .and_then(|wa| wa.app_secret.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Arc::from);
    if whatsapp.is_some() && whatsapp_app_secret.is_none() {
        tracing::warn!(
            "WhatsApp app_secret not set: webhook signatures will not be verified. \
             Set channels_config.whatsapp.app_secret or SHOPWISE_WHATSAPP_APP_SECRET."
        );
    }
    let outbound = whatsapp.clone().map(|wa| wa as Arc<dyn Channel>);

    let auth = Arc::new(TokenGuard::new(&config.gateway.api_tokens));
    if !auth.require_auth() {
        tracing::warn!(
            "gateway.api_tokens is empty: /send-message and /api/status are unauthenticated"
        );
    }

    Ok(AppState {
        config: Arc::new(config),
        assistant,
        sessions,
        media,
        whatsapp,
        whatsapp_app_secret,
        outbound,
        auth,
        tasks: TaskTracker::new(),
    })
}

/// Run the gateway until ctrl-c or SIGTERM, then stop the session sweeper.
pub async fn run_gateway(config: Config) -> Result<()> {
    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let sweep_interval = config.sessions.sweep_interval();
    let idle_timeout = config.sessions.idle_timeout();

    crate::health::mark_component_starting("gateway");
    let state = build_state(config)?;
    let sweeper = SessionSweeper::spawn(state.sessions.clone(), sweep_interval, idle_timeout);
    let whatsapp_enabled = state.whatsapp.is_some();
    let tasks = state.tasks.clone();
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway on {addr}"))?;
    let local_addr = listener.local_addr()?;

    crate::health::mark_component_ok("gateway");
    tracing::info!(
        address = %local_addr,
        whatsapp = whatsapp_enabled,
        sweep_interval_secs = sweep_interval.as_secs(),
        idle_timeout_secs = idle_timeout.as_secs(),
        "Gateway listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error");

    drain_replies(&tasks, REPLY_DRAIN_TIMEOUT).await;
    tracing::info!("Gateway stopped, shutting down session sweeper");
    sweeper.shutdown().await;
    served
}

/// Stop accepting reply tasks and wait up to `limit` for the running ones.
/// Returns true when every task finished.
async fn drain_replies(tasks: &TaskTracker, limit: Duration) -> bool {
    tasks.close();
    let pending = tasks.len();
    if pending == 0 {
        return true;
    }
    tracing::info!(pending, "Waiting for in-flight replies");
    if tokio::time::timeout(limit, tasks.wait()).await.is_ok() {
        true
    } else {
        tracing::warn!(
            dropped = tasks.len(),
            "Shutdown timed out, abandoning in-flight replies"
        );
        false
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
