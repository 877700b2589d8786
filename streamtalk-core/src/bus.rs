// ABOUTME: Intake queue between chat sources and the reply loop
// ABOUTME: Unbounded FIFO; every enqueued message also lands in the overlay viewer feed

use crate::message::InboundMessage;
use crate::state::StreamState;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cloneable producer half, callable from any task
#[derive(Clone)]
pub struct IntakeSender {
    tx: mpsc::UnboundedSender<InboundMessage>,
    state: Arc<StreamState>,
}

/// Single consumer half, owned by the orchestrator
pub struct IntakeReceiver {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

pub fn intake(state: Arc<StreamState>) -> (IntakeSender, IntakeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IntakeSender { tx, state }, IntakeReceiver { rx })
}

impl IntakeSender {
    /// Never blocks. Returns false only when the receiver is gone.
    pub fn enqueue(&self, mut message: InboundMessage) -> bool {
        message.id = self.state.record_incoming(&message);
        tracing::debug!(id = message.id, sender = %message.sender_name, "Chat message enqueued");
        self.tx.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl IntakeReceiver {
    /// Wait for the next message. None once every sender is dropped and the queue is empty.
    pub async fn take_one_blocking(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Everything currently buffered, in arrival order
    pub fn drain_non_blocking(&mut self) -> Vec<InboundMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            drained.push(message);
        }
        drained
    }
}
