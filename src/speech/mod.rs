// ABOUTME: Speech backends selected from the [speech] config section
// ABOUTME: "silent" shows replies without audio, "remote" calls a TTS server

pub mod normalize;
pub mod remote;

pub use normalize::text_for_tts;
pub use remote::RemoteSpeech;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use streamtalk_core::config::SpeechConfig;
use streamtalk_core::traits::{SharedSpeech, SilentSpeech};

/// Build the configured backend. `data_dir` holds the latest synthesized clip.
pub fn build_speech(config: &SpeechConfig, data_dir: &Path) -> Result<SharedSpeech> {
    match config.backend.as_str() {
        "silent" => Ok(Arc::new(SilentSpeech)),
        "remote" => Ok(Arc::new(RemoteSpeech::new(
            config,
            data_dir.join("latest_reply.wav"),
        )?)),
        other => anyhow::bail!("Unknown speech backend '{}'", other),
    }
}
