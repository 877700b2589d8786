// ABOUTME: Speech backend that calls a remote voice-cloning TTS server and plays the result locally
// ABOUTME: Picks ref_<emotion>.wav as the reference voice, falling back to ref.wav

use super::normalize::{text_for_tts, PLACEHOLDER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamtalk_core::config::SpeechConfig;
use streamtalk_core::{AudioHandle, Emotion, SpeechSynthesizer};

const DEFAULT_REFERENCE: &str = "ref.wav";

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    emotion: &'a str,
    language: &'a str,
    /// Reference clip name; the server holds the same voice assets
    reference: &'a str,
}

/// Reference clip for an emotion, or None when the directory has neither file
pub fn resolve_reference(dir: &Path, emotion: Emotion) -> Option<PathBuf> {
    let candidate = dir.join(format!("ref_{}.wav", emotion.as_str()));
    if candidate.is_file() {
        return Some(candidate);
    }
    let fallback = dir.join(DEFAULT_REFERENCE);
    fallback.is_file().then_some(fallback)
}

pub struct RemoteSpeech {
    client: reqwest::Client,
    endpoint: String,
    reference_dir: PathBuf,
    player: Vec<String>,
    output_path: PathBuf,
}

impl RemoteSpeech {
    /// `output_path` receives the latest synthesized clip
    pub fn new(config: &SpeechConfig, output_path: PathBuf) -> Result<Self> {
        let base = config
            .remote_url
            .as_deref()
            .context("speech.remote_url is not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build TTS HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/synthesize", base.trim_end_matches('/')),
            reference_dir: PathBuf::from(&config.reference_dir),
            player: config.player_command.clone(),
            output_path,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for RemoteSpeech {
    async fn synthesize(&self, text: &str, emotion: Emotion, language: &str) -> Result<AudioHandle> {
        let spoken = text_for_tts(text);
        if spoken.trim().is_empty() || spoken == PLACEHOLDER {
            return Ok(AudioHandle::Silent);
        }

        let reference = resolve_reference(&self.reference_dir, emotion).with_context(|| {
            format!(
                "No reference audio in {} (need ref_{}.wav or {})",
                self.reference_dir.display(),
                emotion.as_str(),
                DEFAULT_REFERENCE
            )
        })?;
        let reference_name = reference
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_REFERENCE);

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesizeRequest {
                text: &spoken,
                emotion: emotion.as_str(),
                language,
                reference: reference_name,
            })
            .send()
            .await
            .context("TTS request failed")?
            .error_for_status()
            .context("TTS server returned an error")?;
        let audio = response.bytes().await.context("Failed to read TTS audio")?;
        if audio.is_empty() {
            anyhow::bail!("TTS server returned no audio");
        }

        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&self.output_path, &audio)
            .await
            .with_context(|| format!("Failed to write {}", self.output_path.display()))?;
        tracing::debug!(
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            reference = %reference_name,
            "Speech synthesized"
        );
        Ok(AudioHandle::File(self.output_path.clone()))
    }

    async fn play(&self, handle: &AudioHandle) -> Result<()> {
        let AudioHandle::File(path) = handle else {
            return Ok(());
        };
        let Some((program, args)) = self.player.split_first() else {
            anyhow::bail!("No audio player configured");
        };
        let status = tokio::process::Command::new(program)
            .args(args)
            .arg(path)
            .status()
            .await
            .with_context(|| format!("Failed to start audio player {}", program))?;
        if !status.success() {
            anyhow::bail!("Audio player {} exited with {}", program, status);
        }
        Ok(())
    }
}
