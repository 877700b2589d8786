// ABOUTME: Wires config into the running system: model, memory, speech, watchdog, sources, overlay
// ABOUTME: Ctrl-C cancels everything; the reply loop finishes its current cycle before exiting

use crate::chat::{spawn_supervised, BackoffConfig, StdinSource};
use crate::overlay::{overlay_router, serve, spawn_snapshot_publisher, OverlayState, WsHub};
use crate::speech::build_speech;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use streamtalk_core::filter::ChatFilter;
use streamtalk_core::generation::{ReplyGenerator, TokenLimits};
use streamtalk_core::idle::{spawn_idle_driver, IdleSettings};
use streamtalk_core::memory::{ConversationMemory, MemorySettings};
use streamtalk_core::prompt::PromptBook;
use streamtalk_core::traits::{NullAvatar, SharedAvatar};
use streamtalk_core::watchdog::spawn_watchdog;
use streamtalk_core::{intake, metrics, paths, Config, ModelRegistry, ReplyOrchestrator, StreamState};
use tokio_util::sync::CancellationToken;

const SNAPSHOT_PUSH_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(config: Config) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let state = Arc::new(StreamState::from_config(&config));
    let model = ModelRegistry::default()
        .create_from_config(&config.model)
        .context("Failed to create language model backend")?;
    tracing::info!(backend = %config.model.backend_type(), model = %model.name(), "Language model ready");

    let prompts = Arc::new(PromptBook::load(&config.persona)?);
    let generator = ReplyGenerator::new(model, prompts, TokenLimits::from(&config.persona));
    let memory = ConversationMemory::open(config.history_dir(), MemorySettings::from(&config.memory))?;
    let speech = build_speech(&config.speech, &paths::data_dir())?;
    let avatar: SharedAvatar = Arc::new(NullAvatar);

    let orchestrator = ReplyOrchestrator::new(
        Arc::clone(&state),
        memory,
        generator,
        speech,
        Arc::clone(&avatar),
        ChatFilter::new(&config.filter),
        config.speech.language.clone(),
    );

    let (sender, receiver) = intake(Arc::clone(&state));
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(spawn_watchdog(Arc::clone(&state), cancel.clone()));
    if config.avatar.idle_motion {
        tasks.push(spawn_idle_driver(
            avatar,
            state.speaking_flag(),
            IdleSettings::from(&config.avatar),
            cancel.clone(),
        ));
    }

    if config.chat.stdin {
        let supervised = spawn_supervised(
            Arc::new(StdinSource),
            sender.clone(),
            BackoffConfig::from(&config.chat),
            cancel.clone(),
        );
        tasks.push(tokio::spawn(async move {
            match supervised.await {
                Ok(Err(e)) => tracing::error!(error = %e, "Chat source stopped"),
                Err(e) => tracing::error!(error = %e, "Chat source task panicked"),
                Ok(Ok(())) => {}
            }
        }));
    }

    let hub = WsHub::new();
    tasks.push(spawn_snapshot_publisher(
        Arc::clone(&state),
        hub.clone(),
        SNAPSHOT_PUSH_INTERVAL,
        cancel.clone(),
    ));
    let router = overlay_router(
        OverlayState {
            stream: Arc::clone(&state),
            intake: sender,
            hub,
            api_key: config.overlay.api_key.clone(),
        },
        metrics_handle,
    );
    let overlay_config = config.overlay.clone();
    let overlay_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = serve(&overlay_config, router, overlay_cancel).await {
            tracing::error!(error = %e, "Overlay server stopped");
        }
    }));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal_cancel.cancel();
        }
    });

    let memory = orchestrator.run(receiver, cancel.clone()).await?;
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    tracing::info!(turns = memory.len(), "Shutdown complete");
    Ok(())
}

/// Touch the backup sentinel; the running loop takes the snapshot between cycles
pub fn request_snapshot(config: &Config) -> Result<PathBuf> {
    let dir = config.history_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let sentinel = paths::backup_sentinel(&dir);
    std::fs::write(&sentinel, "").with_context(|| format!("Failed to write {}", sentinel.display()))?;
    Ok(sentinel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_snapshot_touches_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.memory.history_dir = dir.path().join("history").to_string_lossy().to_string();

        let sentinel = request_snapshot(&config).unwrap();
        assert!(sentinel.exists());
        assert_eq!(sentinel, paths::backup_sentinel(&dir.path().join("history")));
    }
}
