// ABOUTME: HTTP handlers for the overlay: state snapshot, manual clear, chat injection, metrics
// ABOUTME: Chat injection requires the X-API-Key header when an overlay api_key is configured

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use streamtalk_core::presentation::OverlaySnapshot;
use streamtalk_core::InboundMessage;

use super::websocket::ServerMessage;
use super::OverlayState;

pub const API_KEY_HEADER: &str = "x-api-key";
const MAX_CHAT_MESSAGE_BYTES: usize = 4 * 1024;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user: String,
    pub message: String,
    /// Marks the message as coming from the channel owner
    #[serde(default)]
    pub owner: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

fn reply(status: StatusCode, success: bool, message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
    (
        status,
        Json(ApiResponse {
            success,
            message: message.into(),
        }),
    )
}

/// GET /api/state
pub async fn state_handler(State(state): State<OverlayState>) -> Json<OverlaySnapshot> {
    Json(state.stream.snapshot())
}

/// POST /api/clear
pub async fn clear_handler(State(state): State<OverlayState>) -> (StatusCode, Json<ApiResponse>) {
    state.stream.clear_feeds();
    state.hub.broadcast(ServerMessage::Cleared);
    tracing::info!("Overlay feeds cleared");
    reply(StatusCode::OK, true, "Overlay cleared")
}

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<OverlayState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if let Some(expected) = &state.api_key {
        let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            tracing::warn!(user = %payload.user, "Chat injection authentication failed");
            return reply(StatusCode::UNAUTHORIZED, false, "Invalid or missing API key");
        }
    }

    let user = payload.user.trim();
    let text = payload.message.trim();
    if user.is_empty() || text.is_empty() {
        return reply(StatusCode::BAD_REQUEST, false, "user and message are required");
    }
    if text.len() > MAX_CHAT_MESSAGE_BYTES {
        return reply(
            StatusCode::BAD_REQUEST,
            false,
            format!("Message too large (max {} bytes)", MAX_CHAT_MESSAGE_BYTES),
        );
    }

    let mut message = InboundMessage::new(format!("api:{}", user), user, text);
    if payload.owner {
        message = message.from_owner();
    }
    if !state.intake.enqueue(message) {
        tracing::warn!("Chat injection refused, reply loop is not running");
        return reply(StatusCode::SERVICE_UNAVAILABLE, false, "Reply loop is not running");
    }
    tracing::info!(user = %user, "Chat message injected over HTTP");
    reply(StatusCode::ACCEPTED, true, "Queued")
}

/// GET /metrics
pub async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
