// ABOUTME: Collaborator traits the reply loop drives: speech, avatar, and chat sources
// ABOUTME: Concrete network and device implementations live in the binary crate

use crate::bus::IntakeSender;
use crate::message::Emotion;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Speech
// =============================================================================

/// Synthesized audio ready for playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioHandle {
    /// Audio written to disk
    File(PathBuf),
    /// Nothing to play; the reply is shown without audio
    Silent,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, emotion: Emotion, language: &str) -> Result<AudioHandle>;

    /// Resolves when playback has finished
    async fn play(&self, handle: &AudioHandle) -> Result<()>;
}

pub type SharedSpeech = Arc<dyn SpeechSynthesizer>;

/// Shows replies without audio
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeech;

#[async_trait]
impl SpeechSynthesizer for SilentSpeech {
    async fn synthesize(&self, _text: &str, _emotion: Emotion, _language: &str) -> Result<AudioHandle> {
        Ok(AudioHandle::Silent)
    }

    async fn play(&self, _handle: &AudioHandle) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Avatar
// =============================================================================

#[async_trait]
pub trait AvatarController: Send + Sync {
    async fn set_emotion(&self, emotion: Emotion) -> Result<()>;

    /// Gaze or head position, each axis in [-1, 1]
    async fn set_gaze(&self, x: f32, y: f32) -> Result<()>;
}

pub type SharedAvatar = Arc<dyn AvatarController>;

/// Used when no avatar software is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAvatar;

#[async_trait]
impl AvatarController for NullAvatar {
    async fn set_emotion(&self, emotion: Emotion) -> Result<()> {
        tracing::trace!(%emotion, "Avatar emotion (no avatar attached)");
        Ok(())
    }

    async fn set_gaze(&self, _x: f32, _y: f32) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Chat sources
// =============================================================================

/// A connection to a chat service that feeds the intake queue.
///
/// `run` returns Ok when the source ended cleanly (EOF, cancellation) and
/// Err when the connection dropped and should be retried.
#[async_trait]
pub trait ChatSource: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, intake: IntakeSender, cancel: CancellationToken) -> Result<()>;
}
