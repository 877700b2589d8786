// ABOUTME: Shared fixtures for reply loop integration tests
// ABOUTME: Recording speech and avatar fakes plus a harness wiring them to a scripted MockModel

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::TimeDelta;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamtalk_core::filter::ChatFilter;
use streamtalk_core::generation::{ReplyGenerator, TokenLimits};
use streamtalk_core::memory::{ConversationMemory, MemorySettings};
use streamtalk_core::prompt::PromptBook;
use streamtalk_core::session::SessionTimeouts;
use streamtalk_core::{
    AudioHandle, AvatarController, Emotion, InboundMessage, PendingBatch, ReplyOrchestrator,
    SpeechSynthesizer, StreamState,
};
use streamtalk_llm::backends::mock::MockModel;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Records every line voiced and whether the speaking flag was up during playback
pub struct RecordingSpeech {
    spoken: Mutex<Vec<(String, Emotion)>>,
    speaking: Arc<AtomicBool>,
    flag_held: Mutex<Vec<bool>>,
    fail_synthesis: bool,
    play_delay: Duration,
    play_gate: Option<Arc<Semaphore>>,
}

impl RecordingSpeech {
    pub fn new(speaking: Arc<AtomicBool>) -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            speaking,
            flag_held: Mutex::new(Vec::new()),
            fail_synthesis: false,
            play_delay: Duration::ZERO,
            play_gate: None,
        }
    }

    pub fn failing(speaking: Arc<AtomicBool>) -> Self {
        Self {
            fail_synthesis: true,
            ..Self::new(speaking)
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn emotions(&self) -> Vec<Emotion> {
        self.spoken.lock().unwrap().iter().map(|(_, e)| *e).collect()
    }

    pub fn flag_held_during_playback(&self) -> Vec<bool> {
        self.flag_held.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSpeech {
    async fn synthesize(&self, text: &str, emotion: Emotion, _language: &str) -> Result<AudioHandle> {
        self.spoken.lock().unwrap().push((text.to_string(), emotion));
        if self.fail_synthesis {
            anyhow::bail!("reference audio missing");
        }
        Ok(AudioHandle::Silent)
    }

    async fn play(&self, _handle: &AudioHandle) -> Result<()> {
        self.flag_held
            .lock()
            .unwrap()
            .push(self.speaking.load(Ordering::SeqCst));
        if let Some(gate) = &self.play_gate {
            gate.acquire().await?.forget();
        }
        if !self.play_delay.is_zero() {
            tokio::time::sleep(self.play_delay).await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAvatar {
    pub emotions: Mutex<Vec<Emotion>>,
}

#[async_trait]
impl AvatarController for RecordingAvatar {
    async fn set_emotion(&self, emotion: Emotion) -> Result<()> {
        self.emotions.lock().unwrap().push(emotion);
        Ok(())
    }

    async fn set_gaze(&self, _x: f32, _y: f32) -> Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub state: Arc<StreamState>,
    pub mock: MockModel,
    pub speech: Arc<RecordingSpeech>,
    pub avatar: Arc<RecordingAvatar>,
    pub orchestrator: ReplyOrchestrator,
    pub dir: TempDir,
}

pub struct HarnessOptions {
    pub reading_enabled: bool,
    pub failing_speech: bool,
    pub memory: MemorySettings,
    pub timeouts: SessionTimeouts,
    /// How long each playback takes
    pub play_delay: Duration,
    /// Every playback waits for one permit when set
    pub play_gate: Option<Arc<Semaphore>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            reading_enabled: true,
            failing_speech: false,
            memory: MemorySettings::default(),
            timeouts: SessionTimeouts::default(),
            play_delay: Duration::ZERO,
            play_gate: None,
        }
    }
}

pub fn harness(mock: MockModel) -> Harness {
    harness_with(mock, HarnessOptions::default())
}

pub fn harness_with(mock: MockModel, options: HarnessOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(StreamState::new(
        options.timeouts,
        50,
        TimeDelta::seconds(300),
        options.reading_enabled,
    ));
    let base = if options.failing_speech {
        RecordingSpeech::failing(state.speaking_flag())
    } else {
        RecordingSpeech::new(state.speaking_flag())
    };
    let speech = Arc::new(RecordingSpeech {
        play_delay: options.play_delay,
        play_gate: options.play_gate,
        ..base
    });
    let avatar = Arc::new(RecordingAvatar::default());
    let memory = ConversationMemory::open(dir.path(), options.memory).unwrap();
    let generator = ReplyGenerator::new(
        Arc::new(mock.clone()),
        Arc::new(PromptBook::new("Choco", "")),
        TokenLimits::default(),
    );
    let orchestrator = ReplyOrchestrator::new(
        Arc::clone(&state),
        memory,
        generator,
        speech.clone(),
        avatar.clone(),
        ChatFilter::new(&Default::default()),
        "ko",
    )
    .with_rng(StdRng::seed_from_u64(42));

    Harness {
        state,
        mock,
        speech,
        avatar,
        orchestrator,
        dir,
    }
}

pub fn msg(sender_id: &str, name: &str, text: &str) -> InboundMessage {
    InboundMessage::new(sender_id, name, text)
}

pub fn batch(messages: Vec<InboundMessage>) -> PendingBatch {
    PendingBatch::new(messages).unwrap()
}
