// ABOUTME: Ambient avatar motion between replies
// ABOUTME: Checks the speaking flag before every move and never touches the queue or memory

use crate::config::AvatarConfig;
use crate::traits::SharedAvatar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct IdleSettings {
    pub interval: Duration,
    /// Largest gaze offset on either axis, in [0, 1]
    pub gaze_range: f32,
}

impl From<&AvatarConfig> for IdleSettings {
    fn from(config: &AvatarConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.idle_interval_ms.max(100)),
            gaze_range: config.gaze_range.clamp(0.0, 1.0),
        }
    }
}

pub fn spawn_idle_driver(
    avatar: SharedAvatar,
    speaking: Arc<AtomicBool>,
    settings: IdleSettings,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_idle_driver(avatar, speaking, settings, StdRng::from_entropy(), cancel).await;
    })
}

pub async fn run_idle_driver(
    avatar: SharedAvatar,
    speaking: Arc<AtomicBool>,
    settings: IdleSettings,
    mut rng: StdRng,
    cancel: CancellationToken,
) {
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let range = settings.gaze_range;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if speaking.load(Ordering::SeqCst) {
                    continue;
                }
                let (x, y) = if range > 0.0 {
                    (rng.gen_range(-range..=range), rng.gen_range(-range..=range))
                } else {
                    (0.0, 0.0)
                };
                if let Err(e) = avatar.set_gaze(x, y).await {
                    tracing::debug!(error = %e, "Idle motion failed");
                }
            }
        }
    }
    tracing::debug!("Idle driver stopped");
}
