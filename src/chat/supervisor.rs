// ABOUTME: Keeps a chat source running: restarts it with backoff after errors, stops on cancel
// ABOUTME: A clean return from the source ends supervision without a retry

use super::backoff::{Backoff, BackoffConfig};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use streamtalk_core::traits::ChatSource;
use streamtalk_core::IntakeSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn spawn_supervised(
    source: Arc<dyn ChatSource>,
    intake: IntakeSender,
    backoff: BackoffConfig,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(supervise(source, intake, backoff, cancel))
}

pub async fn supervise(
    source: Arc<dyn ChatSource>,
    intake: IntakeSender,
    backoff: BackoffConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut backoff = Backoff::new(backoff);
    let name = source.name().to_string();

    loop {
        if cancel.is_cancelled() || intake.is_closed() {
            return Ok(());
        }

        tracing::info!(source = %name, "Chat source connecting");
        let started = Instant::now();
        let error = match source.run(intake.clone(), cancel.clone()).await {
            Ok(()) => {
                tracing::info!(source = %name, "Chat source finished");
                return Ok(());
            }
            Err(e) => e,
        };

        if started.elapsed() >= backoff.stable_after() {
            backoff.reset();
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(source = %name, error = %error, attempts = backoff.failures(), "Chat source gave up");
            return Err(error.context(format!("chat source {} failed too many times", name)));
        };
        tracing::warn!(
            source = %name,
            error = %error,
            attempt = backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "Chat source dropped, reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
