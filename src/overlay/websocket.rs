// ABOUTME: WebSocket push channel for overlay pages: sends the state snapshot whenever it changes
// ABOUTME: A publisher task polls StreamState and broadcasts through WsHub to every connected client

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use streamtalk_core::presentation::OverlaySnapshot;
use streamtalk_core::StreamState;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::OverlayState;

// =============================================================================
// WebSocket Messages
// =============================================================================

/// Messages from the overlay page to the server
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "refresh")]
    Refresh,
}

/// Messages from the server to overlay pages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "state.snapshot")]
    Snapshot { data: OverlaySnapshot },
    #[serde(rename = "state.cleared")]
    Cleared,
}

// =============================================================================
// WebSocket Hub
// =============================================================================

#[derive(Clone)]
pub struct WsHub {
    sender: broadcast::Sender<ServerMessage>,
}

impl WsHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn broadcast(&self, msg: ServerMessage) {
        // No receivers connected is fine
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.sender.subscribe()
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast the snapshot each time its serialized form changes
pub fn spawn_snapshot_publisher(
    stream: Arc<StreamState>,
    hub: WsHub,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = stream.snapshot();
                    let Ok(json) = serde_json::to_string(&snapshot) else {
                        continue;
                    };
                    if json != last {
                        last = json;
                        hub.broadcast(ServerMessage::Snapshot { data: snapshot });
                    }
                }
            }
        }
        tracing::debug!("Snapshot publisher stopped");
    })
}

// =============================================================================
// WebSocket Handler
// =============================================================================

/// WebSocket upgrade handler at /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<OverlayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize overlay message");
            None
        }
    }
}

async fn handle_ws(socket: WebSocket, state: OverlayState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(16);
    let mut broadcast_rx = state.hub.subscribe();

    // New pages start from the current state
    let _ = tx
        .send(ServerMessage::Snapshot {
            data: state.stream.snapshot(),
        })
        .await;

    let writer_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = rx.recv() => msg,
                Ok(msg) = broadcast_rx.recv() => msg,
                else => break,
            };
            let Some(frame) = encode(&msg) else {
                continue;
            };
            if ws_sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let stream = Arc::clone(&state.stream);
    let reader_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Refresh) => {
                        let snapshot = ServerMessage::Snapshot {
                            data: stream.snapshot(),
                        };
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Invalid WebSocket message from overlay"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer_task => {},
        _ = reader_task => {},
    }
    tracing::debug!("Overlay WebSocket closed");
}
