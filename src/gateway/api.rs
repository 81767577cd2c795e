//! HTTP handlers for the storefront gateway.
//!
//! `/send-message` and `/api/status` require bearer token authentication
//! when `gateway.api_tokens` is non-empty.

use super::AppState;
use crate::channels::InboundMessage;
use crate::media::{MediaError, MediaMetadata};
use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

// ── Bearer token auth ───────────────────────────────────────────

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
}

/// Verify bearer token against the configured tokens. Returns error response if unauthorized.
fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if !state.auth.require_auth() {
        return Ok(());
    }

    let token = extract_bearer_token(headers).unwrap_or("");
    if state.auth.is_authenticated(token) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Unauthorized: send Authorization: Bearer <token>"
            })),
        ))
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

// ── Request bodies ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub message: String,
}

/// Meta's webhook verification query (`hub.mode`, `hub.verify_token`, `hub.challenge`).
#[derive(Debug, Deserialize)]
pub struct WhatsAppVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

// ── Handlers ────────────────────────────────────────────────────

/// GET /health: liveness plus component health
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = crate::health::snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "healthy": snapshot.is_healthy(),
        "uptime_seconds": snapshot.uptime_seconds,
        "active_sessions": state.sessions.len(),
        "components": snapshot.components,
    }))
}

/// POST /upload: multipart upload, field `file`
pub async fn handle_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(e.status(), e.body_text()),
        };

        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return error_response(e.status(), e.body_text()),
        };

        let metadata = MediaMetadata {
            original_name,
            mime_type,
            size_bytes: Some(data.len() as u64),
        };

        return match state.media.store(&data, metadata).await {
            Ok(entry) => {
                tracing::info!(
                    file = %entry.file_name,
                    size_bytes = data.len(),
                    "Upload stored"
                );
                (
                    StatusCode::CREATED,
                    Json(serde_json::json!({
                        "file_name": entry.file_name,
                        "size_bytes": data.len(),
                        "url": format!("/files/{}", entry.file_name),
                    })),
                )
                    .into_response()
            }
            Err(e) => media_error_response(&e),
        };
    }

    error_response(StatusCode::BAD_REQUEST, "Missing multipart field 'file'")
}

/// Types a browser would render as active content on the gateway origin.
const ACTIVE_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "image/svg+xml",
    "text/xml",
    "application/xml",
    "text/javascript",
    "application/javascript",
];

fn is_active_content(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    ACTIVE_CONTENT_TYPES.contains(&essence.as_str())
}

/// GET /files/{name}: serve a stored upload
///
/// Markup and script uploads are forced to a download so they never run
/// in the gateway's origin.
pub async fn handle_get_file(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.media.read(&name).await {
        Ok((entry, data)) => {
            let guessed = entry
                .metadata
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let (content_type, disposition) = if is_active_content(&guessed) {
                ("application/octet-stream".to_string(), "attachment")
            } else {
                (guessed, "inline")
            };
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_DISPOSITION, disposition.to_string()),
                    (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
                    (
                        header::CONTENT_SECURITY_POLICY,
                        "default-src 'none'; sandbox".to_string(),
                    ),
                ],
                data,
            )
                .into_response()
        }
        Err(e) => media_error_response(&e),
    }
}

/// GET /files: list stored uploads
pub async fn handle_list_files(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = require_auth(&state, &headers) {
        return e.into_response();
    }

    match state.media.list().await {
        Ok(entries) => {
            let files: Vec<_> = entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "file_name": e.file_name,
                        "size_bytes": e.metadata.size_bytes,
                        "mime_type": e.metadata.mime_type,
                        "created_at": e.created_at,
                        "url": format!("/files/{}", e.file_name),
                    })
                })
                .collect();
            Json(serde_json::json!({"files": files, "store": state.media.name()})).into_response()
        }
        Err(e) => media_error_response(&e),
    }
}

/// DELETE /files/{name}: remove a stored upload
pub async fn handle_delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(e) = require_auth(&state, &headers) {
        return e.into_response();
    }

    match state.media.delete(&name).await {
        Ok(()) => {
            tracing::info!(file = %name, "Upload deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => media_error_response(&e),
    }
}

fn media_error_response(err: &MediaError) -> Response {
    match err {
        MediaError::InvalidName(_) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        MediaError::NotFound(_) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        MediaError::TooLarge { .. } => {
            error_response(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
        }
        MediaError::Io(e) => {
            tracing::error!("Media storage failure: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Media storage failure")
        }
    }
}

/// POST /send-message: push a text message through the WhatsApp channel
pub async fn handle_send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = require_auth(&state, &headers) {
        return e.into_response();
    }

    let Ok(body) = serde_json::from_slice::<SendMessageBody>(&body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid JSON body, expected {\"to\": ..., \"message\": ...}",
        );
    };

    let to = body.to.trim();
    let message = body.message.trim();
    if to.is_empty() || message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "'to' and 'message' are required");
    }

    let Some(channel) = state.outbound.as_ref() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "No messaging channel configured",
        );
    };

    match channel.send(to, message).await {
        Ok(()) => {
            tracing::info!(
                recipient = %crate::security::redact(to),
                channel = channel.name(),
                "Message sent"
            );
            Json(serde_json::json!({"status": "sent"})).into_response()
        }
        Err(e) => {
            crate::health::mark_component_error(channel.name(), &e);
            tracing::error!("send-message failed: {e}");
            error_response(StatusCode::BAD_GATEWAY, "Failed to deliver message")
        }
    }
}

/// GET /whatsapp: Meta webhook verification handshake
pub async fn handle_whatsapp_verify(
    State(state): State<AppState>,
    Query(params): Query<WhatsAppVerifyQuery>,
) -> Response {
    let Some(whatsapp) = state.whatsapp.as_ref() else {
        return error_response(StatusCode::NOT_FOUND, "WhatsApp not configured");
    };

    match whatsapp.verify_subscription(
        params.mode.as_deref(),
        params.verify_token.as_deref(),
        params.challenge.as_deref(),
    ) {
        Some(challenge) => {
            tracing::info!("WhatsApp webhook verified successfully");
            (StatusCode::OK, challenge).into_response()
        }
        None => {
            tracing::warn!("WhatsApp webhook verification failed: token mismatch");
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
    }
}

/// POST /whatsapp: inbound message webhook
pub async fn handle_whatsapp_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(whatsapp) = state.whatsapp.as_ref() else {
        return error_response(StatusCode::NOT_FOUND, "WhatsApp not configured");
    };

    if let Some(app_secret) = state.whatsapp_app_secret.as_deref() {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !crate::channels::verify_signature(app_secret, &body, signature) {
            tracing::warn!(
                "WhatsApp webhook signature verification failed (signature: {})",
                if signature.is_empty() { "missing" } else { "invalid" }
            );
            return error_response(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON payload");
    };

    let messages = whatsapp.parse_webhook_payload(&payload);
    let Some(outbound) = state.outbound.clone() else {
        return Json(serde_json::json!({"status": "ok", "accepted": 0})).into_response();
    };

    let accepted = messages.len();
    for batch in group_by_sender(messages) {
        let assistant = state.assistant.clone();
        let outbound = outbound.clone();
        // One task per sender keeps replies in payload order, so each prompt
        // sees the exchange before it.
        state.tasks.spawn(async move {
            for msg in &batch {
                assistant.run_inbound(outbound.as_ref(), msg).await;
            }
        });
    }

    // Acknowledge immediately; Meta retries slow webhooks.
    Json(serde_json::json!({"status": "ok", "accepted": accepted})).into_response()
}

/// Split messages into per-sender batches, keeping arrival order within each.
fn group_by_sender(messages: Vec<InboundMessage>) -> Vec<Vec<InboundMessage>> {
    let mut batches: Vec<Vec<InboundMessage>> = Vec::new();
    for msg in messages {
        tracing::info!(
            sender = %crate::security::redact(&msg.sender),
            chars = msg.content.chars().count(),
            "WhatsApp message received"
        );
        match batches.iter_mut().find(|b| b[0].sender == msg.sender) {
            Some(batch) => batch.push(msg),
            None => batches.push(vec![msg]),
        }
    }
    batches
}

/// GET /api/status: system status overview
pub async fn handle_api_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = require_auth(&state, &headers) {
        return e.into_response();
    }

    let health = crate::health::snapshot();

    Json(serde_json::json!({
        "provider": state.config.default_provider,
        "provider_backend": state.assistant.provider_name(),
        "model": state.assistant.settings().model,
        "temperature": state.assistant.settings().temperature,
        "active_sessions": state.sessions.len(),
        "session_store": state.sessions.name(),
        "whatsapp_configured": state.whatsapp.is_some(),
        "replies_in_flight": state.tasks.len(),
        "gateway_port": state.config.gateway.port,
        "uptime_seconds": health.uptime_seconds,
        "health": health,
    }))
    .into_response()
}
