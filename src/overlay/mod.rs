// ABOUTME: Overlay HTTP server for stream pages: JSON state, WebSocket pushes, chat injection, metrics
// ABOUTME: Reads StreamState and writes only to the intake queue and the feed clear operation

pub mod routes;
pub mod websocket;

pub use websocket::{spawn_snapshot_publisher, ServerMessage, WsHub};

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use streamtalk_core::config::OverlayConfig;
use streamtalk_core::{IntakeSender, StreamState};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct OverlayState {
    pub stream: Arc<StreamState>,
    pub intake: IntakeSender,
    pub hub: WsHub,
    pub api_key: Option<String>,
}

/// Build the overlay router. `/metrics` is mounted only with a Prometheus handle.
pub fn overlay_router(state: OverlayState, metrics: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new()
        .route("/api/state", get(routes::state_handler))
        .route("/api/clear", post(routes::clear_handler))
        .route("/api/chat", post(routes::chat_handler))
        .route("/ws", get(websocket::ws_handler))
        .with_state(state);

    if let Some(handle) = metrics {
        let metrics_routes = Router::new()
            .route("/metrics", get(routes::metrics_handler))
            .with_state(Arc::new(handle));
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}

/// Serve until cancelled
pub async fn serve(config: &OverlayConfig, app: Router, cancel: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind overlay server on {}", addr))?;
    tracing::info!(addr = %addr, "Overlay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Overlay server failed")
}
