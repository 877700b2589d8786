// ABOUTME: The reply loop: waits for chat, batches it, consults the reading session, and speaks one reply
// ABOUTME: Sole owner of conversational memory; session and overlay state go through StreamState

use crate::bus::IntakeReceiver;
use crate::deck::{Card, Deck, DECK_SIZE};
use crate::filter::ChatFilter;
use crate::generation::ReplyGenerator;
use crate::memory::ConversationMemory;
use crate::message::{ConversationTurn, Emotion, InboundMessage, PendingBatch, TurnRole};
use crate::metrics;
use crate::prompt::Framing;
use crate::reply::{Interpretation, ReplyAction, ReplyResult};
use crate::selection::{asks_for_reading, parse_selection};
use crate::session::{ExpiredSession, Phase, SelectionOutcome};
use crate::state::StreamState;
use crate::traits::{SharedAvatar, SharedSpeech};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Session fields copied out under the lock so no await happens while holding it
#[derive(Debug, Clone)]
struct SessionView {
    id: Uuid,
    phase: Phase,
    requester_id: String,
    requester_name: String,
    topic: String,
    spread_count: usize,
    selected: Vec<usize>,
}

enum Wake {
    Message(InboundMessage),
    Expired,
    Shutdown,
}

pub struct ReplyOrchestrator {
    state: Arc<StreamState>,
    memory: ConversationMemory,
    generator: ReplyGenerator,
    speech: SharedSpeech,
    avatar: SharedAvatar,
    filter: ChatFilter,
    language: String,
    rng: StdRng,
}

impl ReplyOrchestrator {
    pub fn new(
        state: Arc<StreamState>,
        memory: ConversationMemory,
        generator: ReplyGenerator,
        speech: SharedSpeech,
        avatar: SharedAvatar,
        filter: ChatFilter,
        language: impl Into<String>,
    ) -> Self {
        Self {
            state,
            memory,
            generator,
            speech,
            avatar,
            filter,
            language: language.into(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed shuffles for tests
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Run until cancelled or every chat source has gone away.
    /// Cancellation is only observed between cycles.
    pub async fn run(mut self, mut intake: IntakeReceiver, cancel: CancellationToken) -> Result<ConversationMemory> {
        tracing::info!("Reply loop started");
        let state = Arc::clone(&self.state);
        loop {
            self.check_sentinel().await;

            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Shutdown,
                message = intake.take_one_blocking() => message.map_or(Wake::Shutdown, Wake::Message),
                _ = state.woken() => Wake::Expired,
            };

            match wake {
                Wake::Message(first) => {
                    let batch = PendingBatch::from_first(first, intake.drain_non_blocking());
                    self.process_batch(batch).await;
                }
                Wake::Expired => self.announce_expired().await,
                Wake::Shutdown => break,
            }
        }

        self.flush_summary().await;
        tracing::info!("Reply loop stopped");
        Ok(self.memory)
    }

    async fn check_sentinel(&mut self) {
        match self.memory.snapshot_if_requested().await {
            Ok(Some(path)) => tracing::info!(path = %path.display(), "Manual memory snapshot written"),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Manual snapshot failed"),
        }
    }

    async fn flush_summary(&mut self) {
        let summarizer = self.generator.summarizer();
        if let Err(e) = self.memory.flush_pending_summary(&summarizer).await {
            tracing::warn!(error = %e, "Summary flush failed, turns stay pending");
        }
    }

    /// One full cycle over a batch. External failures end in "no reply", never an error.
    pub async fn process_batch(&mut self, batch: PendingBatch) {
        let started = Instant::now();
        metrics::record_batch(batch.len());
        tracing::info!(size = batch.len(), "Processing chat batch");

        // Overdue sessions close before any branch logic runs
        self.state.expire_sessions(Utc::now());
        self.announce_expired().await;

        let kept: Vec<InboundMessage> = batch
            .iter()
            .filter(|m| self.filter.allows(m))
            .cloned()
            .collect();

        if let Some(filtered) = PendingBatch::new(kept) {
            let context = self.memory.context_for_next_call();
            self.memory.add_batch(&filtered);
            self.flush_summary().await;

            match self.session_view() {
                None => self.handle_open(&context, &filtered).await,
                Some(view) => match view.phase {
                    Phase::AskingTopic => self.handle_asking_topic(&context, &filtered, view).await,
                    Phase::Selecting => self.handle_selecting(&context, &filtered, view).await,
                    Phase::Revealed | Phase::Failed => self.handle_busy(&context, &filtered, &view).await,
                },
            }
            self.flush_summary().await;
        } else {
            tracing::debug!(size = batch.len(), "Whole batch filtered out");
        }

        self.state.mark_processed(&batch.ids());
        metrics::record_reply_duration(started.elapsed());
    }

    fn session_view(&self) -> Option<SessionView> {
        self.state.with_session(|s| {
            s.current().map(|c| SessionView {
                id: c.id,
                phase: c.phase,
                requester_id: c.requester_id.clone(),
                requester_name: c.requester_name.clone(),
                topic: c.topic.clone().unwrap_or_default(),
                spread_count: c.spread_count,
                selected: c.selected.clone(),
            })
        })
    }

    pub async fn announce_expired(&mut self) {
        for expired in self.state.take_expired() {
            self.announce(expired).await;
        }
    }

    async fn announce(&mut self, expired: ExpiredSession) {
        if !expired.needs_apology() {
            return;
        }
        let text = self
            .generator
            .prompts()
            .expiry_apology(&expired.session.requester_name, expired.phase);
        self.speak(&ReplyResult::new(text, Emotion::Sad)).await;
    }

    async fn generate(
        &self,
        context: &[ConversationTurn],
        batch: &PendingBatch,
        framing: &Framing,
    ) -> Option<ReplyResult> {
        match self.generator.reply(context, &batch.lines(), framing).await {
            Ok(reply) => {
                if reply.is_none() {
                    tracing::debug!("Model chose not to reply");
                }
                reply
            }
            Err(e) => {
                tracing::warn!(error = %e, "No reply this cycle");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Phase branches
    // -------------------------------------------------------------------------

    async fn handle_open(&mut self, context: &[ConversationTurn], batch: &PendingBatch) {
        let enabled = self.state.reading_enabled();
        let framing = if enabled {
            Framing::Open
        } else {
            Framing::ReadingDisabled
        };
        let Some(mut reply) = self.generate(context, batch, &framing).await else {
            return;
        };
        if !enabled && reply.action != ReplyAction::None {
            tracing::info!("Readings disabled, dropping requested action");
            reply.action = ReplyAction::None;
        }

        self.speak(&reply).await;

        // Deadlines start once the viewer has heard the prompt
        match &reply.action {
            ReplyAction::StartTopicQuestion { requester } => {
                let Some(who) = resolve_requester(batch.messages(), requester.as_deref()) else {
                    return;
                };
                let result = self
                    .state
                    .with_session(|s| s.begin_topic_question(&who.sender_id, &who.sender_name, Utc::now()));
                match result {
                    Ok(_) => metrics::record_session("started"),
                    Err(e) => tracing::warn!(error = %e, "Could not open reading session"),
                }
            }
            ReplyAction::StartSelection {
                topic,
                count,
                requester,
            } => {
                let Some(who) = resolve_requester(batch.messages(), requester.as_deref()) else {
                    return;
                };
                let deck = Deck::shuffled(&mut self.rng);
                let result = self.state.with_session(|s| {
                    s.begin_selection(&who.sender_id, &who.sender_name, topic, *count, deck, Utc::now())
                });
                match result {
                    Ok(_) => metrics::record_session("started"),
                    Err(e) => tracing::warn!(error = %e, "Could not open reading session"),
                }
            }
            ReplyAction::CancelSession | ReplyAction::None => {}
        }
    }

    async fn handle_asking_topic(&mut self, context: &[ConversationTurn], batch: &PendingBatch, view: SessionView) {
        if !batch.iter().any(|m| m.sender_id == view.requester_id) {
            return self.handle_busy(context, batch, &view).await;
        }

        let deferral = self.deferral_for_bystanders(batch, &view);
        let framing = Framing::AskingTopic {
            requester_name: view.requester_name.clone(),
        };
        let Some(reply) = self.generate(context, batch, &framing).await else {
            self.speak_deferral(deferral).await;
            return;
        };
        let reply = with_deferral(reply, deferral.as_deref());
        self.speak(&reply).await;

        let now = Utc::now();
        let result = match &reply.action {
            ReplyAction::StartSelection { topic, count, .. } => {
                let deck = Deck::shuffled(&mut self.rng);
                self.state
                    .with_session(|s| s.choose_topic(view.id, topic, *count, deck, now))
            }
            _ => {
                metrics::record_session("declined");
                self.state.with_session(|s| s.cancel(view.id)).map(|_| ())
            }
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Session changed during the cycle");
        }
    }

    async fn handle_selecting(&mut self, context: &[ConversationTurn], batch: &PendingBatch, view: SessionView) {
        let requester_text: Vec<&str> = batch
            .iter()
            .filter(|m| m.sender_id == view.requester_id)
            .map(|m| m.text.as_str())
            .collect();
        if requester_text.is_empty() {
            return self.handle_busy(context, batch, &view).await;
        }

        let deferral = self.deferral_for_bystanders(batch, &view);
        let parsed = parse_selection(&requester_text.join(" "), DECK_SIZE);
        if parsed.is_empty() {
            return self.selection_chat(context, batch, &view, deferral).await;
        }

        let outcome = self
            .state
            .with_session(|s| s.apply_selection(view.id, &parsed, Utc::now()));
        let prompts = self.generator.prompts();
        let deferral = deferral.as_deref();
        match outcome {
            Ok(SelectionOutcome::Ignored) => self.speak_deferral(deferral.map(str::to_string)).await,
            Ok(SelectionOutcome::Restart { spread_count }) => {
                let text = prompts.restart_selection(spread_count);
                let reply = with_deferral(ReplyResult::new(text, Emotion::Surprised), deferral);
                self.speak(&reply).await;
            }
            Ok(SelectionOutcome::Progress { selected, remaining }) => {
                let text = prompts.selection_progress(&selected, remaining);
                let reply = with_deferral(ReplyResult::new(text, Emotion::Happy), deferral);
                self.speak(&reply).await;
            }
            Ok(SelectionOutcome::Complete { cards }) => {
                let text = prompts.cards_chosen(&cards);
                let reply = with_deferral(ReplyResult::new(text, Emotion::Excited), deferral);
                self.speak(&reply).await;
                self.reveal(&view, &cards).await;
            }
            Err(e) => tracing::debug!(error = %e, "Session changed during the cycle"),
        }
    }

    /// Requester spoke without numbers: let the model re-prompt or cancel
    async fn selection_chat(
        &mut self,
        context: &[ConversationTurn],
        batch: &PendingBatch,
        view: &SessionView,
        deferral: Option<String>,
    ) {
        let framing = Framing::Selecting {
            requester_name: view.requester_name.clone(),
            spread_count: view.spread_count,
            selected: view.selected.clone(),
        };
        let Some(mut reply) = self.generate(context, batch, &framing).await else {
            self.speak_deferral(deferral).await;
            return;
        };
        if reply.action.is_start() {
            reply.action = ReplyAction::None;
        }
        let reply = with_deferral(reply, deferral.as_deref());
        self.speak(&reply).await;

        if reply.action == ReplyAction::CancelSession {
            match self.state.with_session(|s| s.cancel(view.id)) {
                Ok(_) => metrics::record_session("cancelled"),
                Err(e) => tracing::debug!(error = %e, "Session changed during the cycle"),
            }
        }
    }

    async fn reveal(&mut self, view: &SessionView, cards: &[Card]) {
        let interpretation = match self.generator.interpret(&view.topic, cards).await {
            Ok(interpretation) => interpretation,
            Err(e) => {
                tracing::warn!(error = %e, session_id = %view.id, "Interpretation failed");
                if self.state.with_session(|s| s.fail(view.id, Utc::now())).is_ok() {
                    metrics::record_session("failed");
                    let text = self.generator.prompts().reading_failed();
                    self.speak(&ReplyResult::new(text, Emotion::Sad)).await;
                }
                return;
            }
        };

        let revealed = self
            .state
            .with_session(|s| s.reveal(view.id, interpretation.clone()));
        if let Err(e) = revealed {
            tracing::debug!(error = %e, "Session closed before the reveal");
            return;
        }
        metrics::record_session("revealed");

        let finished = self.speak(&interpretation_reply(&interpretation)).await;
        if let Err(e) = self
            .state
            .with_session(|s| s.hold_after_narration(view.id, finished))
        {
            tracing::debug!(error = %e, "Session closed during narration");
        }
    }

    /// Deferral line for other viewers in the batch who asked for a reading
    fn deferral_for_bystanders(&self, batch: &PendingBatch, view: &SessionView) -> Option<String> {
        let mut names: Vec<String> = Vec::new();
        for message in batch.iter() {
            if message.sender_id != view.requester_id
                && asks_for_reading(&message.text)
                && !names.contains(&message.sender_name)
            {
                names.push(message.sender_name.clone());
            }
        }
        if names.is_empty() {
            return None;
        }
        tracing::info!(requester = %view.requester_name, deferred = ?names, "Reading busy, deferring bystanders");
        Some(
            self.generator
                .prompts()
                .reading_deferral(&names, &view.requester_name),
        )
    }

    async fn speak_deferral(&mut self, deferral: Option<String>) {
        if let Some(text) = deferral {
            self.speak(&ReplyResult::new(text, Emotion::Neutral)).await;
        }
    }

    /// Someone else holds the reading, or it is on display: ordinary replies only
    async fn handle_busy(&mut self, context: &[ConversationTurn], batch: &PendingBatch, view: &SessionView) {
        let framing = Framing::Busy {
            requester_name: view.requester_name.clone(),
            phase: view.phase,
        };
        let Some(mut reply) = self.generate(context, batch, &framing).await else {
            return;
        };
        if reply.action != ReplyAction::None {
            tracing::info!(requester = %view.requester_name, "Reading busy, deferring start request");
            reply.action = ReplyAction::None;
        }
        self.speak(&reply).await;
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Commit a reply to memory and the overlay, then voice it.
    /// Returns when narration finished.
    async fn speak(&mut self, reply: &ReplyResult) -> DateTime<Utc> {
        self.memory.add_turn(TurnRole::Assistant, reply.text.clone());
        self.state.push_assistant(&reply.text, reply.emotion);
        metrics::record_reply();

        if let Err(e) = self.avatar.set_emotion(reply.emotion).await {
            tracing::warn!(error = %e, "Avatar emotion update failed");
        }

        let _speaking = self.state.begin_speaking();
        match self
            .speech
            .synthesize(reply.spoken_text(), reply.emotion, &self.language)
            .await
        {
            Ok(handle) => {
                if let Err(e) = self.speech.play(&handle).await {
                    tracing::warn!(error = %e, "Playback failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Speech synthesis failed, reply shown without audio"),
        }
        Utc::now()
    }
}

/// Append a bystander deferral to the cycle's single reply
fn with_deferral(mut reply: ReplyResult, deferral: Option<&str>) -> ReplyResult {
    if let Some(note) = deferral {
        reply.text = format!("{} {}", reply.text, note);
        if let Some(tts) = reply.tts_text.as_mut() {
            tts.push(' ');
            tts.push_str(note);
        }
    }
    reply
}

fn interpretation_reply(interpretation: &Interpretation) -> ReplyResult {
    let emotion = if interpretation.danger_alert {
        Emotion::Surprised
    } else {
        Emotion::Neutral
    };
    ReplyResult {
        text: interpretation.text.clone(),
        emotion,
        action: ReplyAction::None,
        tts_text: interpretation.tts_text.clone(),
    }
}

/// The viewer a start action is for: the named sender if present, else the latest speaker
fn resolve_requester<'a>(messages: &'a [InboundMessage], named: Option<&str>) -> Option<&'a InboundMessage> {
    let named = named.map(str::trim).filter(|n| !n.is_empty());
    named
        .and_then(|name| {
            messages
                .iter()
                .rev()
                .find(|m| m.sender_name.trim().eq_ignore_ascii_case(name))
        })
        .or_else(|| messages.last())
}
