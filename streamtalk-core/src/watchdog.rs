// ABOUTME: Once-a-second session watchdog so timeouts fire even when chat is silent
// ABOUTME: Its only mutation is forcing an overdue session to none and waking the reply loop

use crate::state::StreamState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const TICK: Duration = Duration::from_secs(1);

pub fn spawn_watchdog(state: Arc<StreamState>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Session watchdog starting");
        run_watchdog(state, cancel).await;
        tracing::info!("Session watchdog stopped");
    })
}

async fn run_watchdog(state: Arc<StreamState>, cancel: CancellationToken) {
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if state.expire_sessions(Utc::now()) {
                    tracing::debug!("Watchdog expired a session");
                }
            }
        }
    }
}
