// ABOUTME: Reading session state machine: asking_topic -> selecting -> revealed, plus failed
// ABOUTME: At most one session exists; every mutation is keyed by session id so an expired session stays dead

use crate::config::ReadingConfig;
use crate::deck::{Card, Deck};
use crate::reply::Interpretation;
use crate::selection::ParsedSelection;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub const MIN_SPREAD: usize = 1;
pub const MAX_SPREAD: usize = 5;

/// Phase of the active session; "none" is the absence of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AskingTopic,
    Selecting,
    Revealed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AskingTopic => "asking_topic",
            Self::Selecting => "selecting",
            Self::Revealed => "revealed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("a reading for {requester_name} is already in progress")]
    Busy { requester_name: String },
    #[error("no reading session is active")]
    NotActive,
    #[error("session {0} is no longer active")]
    WrongSession(Uuid),
    #[error("operation not allowed while {0}")]
    WrongPhase(Phase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub topic: TimeDelta,
    pub selection: TimeDelta,
    pub reveal_hold: TimeDelta,
    pub failed_hold: TimeDelta,
}

impl From<&ReadingConfig> for SessionTimeouts {
    fn from(config: &ReadingConfig) -> Self {
        let secs = |s: u64| TimeDelta::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1000));
        Self {
            topic: secs(config.topic_timeout_secs),
            selection: secs(config.selection_timeout_secs),
            reveal_hold: secs(config.reveal_hold_secs),
            failed_hold: secs(config.failed_hold_secs),
        }
    }
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        (&ReadingConfig::default()).into()
    }
}

/// Clamp a model-chosen spread size into 1..=5; anything unusable becomes 3
pub fn clamp_spread(count: Option<i64>) -> usize {
    match count {
        Some(n) if n >= MIN_SPREAD as i64 && n <= MAX_SPREAD as i64 => n as usize,
        Some(n) if n > MAX_SPREAD as i64 => MAX_SPREAD,
        _ => 3,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingSession {
    pub id: Uuid,
    pub phase: Phase,
    pub requester_id: String,
    pub requester_name: String,
    pub topic: Option<String>,
    pub spread_count: usize,
    #[serde(skip)]
    pub deck: Option<Deck>,
    pub selected: Vec<usize>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub auto_close_at: Option<DateTime<Utc>>,
    pub revealed: Vec<Card>,
    pub interpretation: Option<Interpretation>,
    pub started_at: DateTime<Utc>,
}

impl ReadingSession {
    pub fn is_requester(&self, sender_id: &str) -> bool {
        self.requester_id == sender_id
    }

    pub fn remaining(&self) -> usize {
        self.spread_count.saturating_sub(self.selected.len())
    }

    /// Cards resolved and waiting for an interpretation
    pub fn is_interpreting(&self) -> bool {
        self.phase == Phase::Selecting && !self.revealed.is_empty()
    }

    /// A revealed session without a close time is still being narrated
    fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let limit = match self.phase {
            Phase::AskingTopic | Phase::Selecting => self.deadline_at,
            Phase::Revealed | Phase::Failed => self.auto_close_at,
        };
        limit.is_some_and(|at| at <= now)
    }
}

/// Result of feeding the requester's numbers into a selecting session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// No usable numbers in the message
    Ignored,
    /// Duplicate or already-chosen number: every selection was cleared
    Restart { spread_count: usize },
    /// Some numbers accepted, more needed
    Progress {
        selected: Vec<usize>,
        remaining: usize,
    },
    /// Exactly spread_count cards resolved
    Complete { cards: Vec<Card> },
}

/// A session removed because its deadline or auto-close time passed
#[derive(Debug, Clone)]
pub struct ExpiredSession {
    pub session: ReadingSession,
    pub phase: Phase,
}

impl ExpiredSession {
    /// Timed out while the requester was still expected to act
    pub fn needs_apology(&self) -> bool {
        matches!(self.phase, Phase::AskingTopic | Phase::Selecting)
    }
}

pub struct SessionState {
    current: Option<ReadingSession>,
    timeouts: SessionTimeouts,
}

impl SessionState {
    pub fn new(timeouts: SessionTimeouts) -> Self {
        Self {
            current: None,
            timeouts,
        }
    }

    pub fn current(&self) -> Option<&ReadingSession> {
        self.current.as_ref()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.current.as_ref().map(|s| s.phase)
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match &self.current {
            Some(existing) => Err(SessionError::Busy {
                requester_name: existing.requester_name.clone(),
            }),
            None => Ok(()),
        }
    }

    fn active_mut(&mut self, id: Uuid) -> Result<&mut ReadingSession, SessionError> {
        match self.current.as_mut() {
            Some(session) if session.id == id => Ok(session),
            Some(_) => Err(SessionError::WrongSession(id)),
            None => Err(SessionError::NotActive),
        }
    }

    fn open(
        &mut self,
        phase: Phase,
        requester_id: &str,
        requester_name: &str,
        now: DateTime<Utc>,
    ) -> &mut ReadingSession {
        self.current.insert(ReadingSession {
            id: Uuid::new_v4(),
            phase,
            requester_id: requester_id.to_string(),
            requester_name: requester_name.to_string(),
            topic: None,
            spread_count: 3,
            deck: None,
            selected: Vec::new(),
            deadline_at: None,
            auto_close_at: None,
            revealed: Vec::new(),
            interpretation: None,
            started_at: now,
        })
    }

    /// none -> asking_topic
    pub fn begin_topic_question(
        &mut self,
        requester_id: &str,
        requester_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid, SessionError> {
        self.ensure_idle()?;
        let deadline = now + self.timeouts.topic;
        let session = self.open(Phase::AskingTopic, requester_id, requester_name, now);
        session.deadline_at = Some(deadline);
        tracing::info!(session_id = %session.id, requester = %requester_name, "Reading session asking for a topic");
        Ok(session.id)
    }

    /// none -> selecting, when the requester already named a topic
    pub fn begin_selection(
        &mut self,
        requester_id: &str,
        requester_name: &str,
        topic: &str,
        spread_count: usize,
        deck: Deck,
        now: DateTime<Utc>,
    ) -> Result<Uuid, SessionError> {
        self.ensure_idle()?;
        let deadline = now + self.timeouts.selection;
        let session = self.open(Phase::Selecting, requester_id, requester_name, now);
        session.topic = Some(topic.to_string());
        session.spread_count = spread_count.clamp(MIN_SPREAD, MAX_SPREAD);
        session.deck = Some(deck);
        session.deadline_at = Some(deadline);
        tracing::info!(
            session_id = %session.id,
            requester = %requester_name,
            spread_count = session.spread_count,
            "Reading session selecting cards"
        );
        Ok(session.id)
    }

    /// asking_topic -> selecting
    pub fn choose_topic(
        &mut self,
        id: Uuid,
        topic: &str,
        spread_count: usize,
        deck: Deck,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let selection_timeout = self.timeouts.selection;
        let session = self.active_mut(id)?;
        if session.phase != Phase::AskingTopic {
            return Err(SessionError::WrongPhase(session.phase));
        }
        session.phase = Phase::Selecting;
        session.topic = Some(topic.to_string());
        session.spread_count = spread_count.clamp(MIN_SPREAD, MAX_SPREAD);
        session.deck = Some(deck);
        session.deadline_at = Some(now + selection_timeout);
        tracing::info!(session_id = %id, spread_count = session.spread_count, "Topic chosen, selecting cards");
        Ok(())
    }

    /// Feed parsed numbers from the requester into a selecting session.
    ///
    /// A duplicate in the raw input, or a number chosen in an earlier turn,
    /// clears every selection. Accepted numbers refresh the deadline.
    pub fn apply_selection(
        &mut self,
        id: Uuid,
        parsed: &ParsedSelection,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome, SessionError> {
        let selection_timeout = self.timeouts.selection;
        let session = self.active_mut(id)?;
        if session.phase != Phase::Selecting || session.is_interpreting() {
            return Err(SessionError::WrongPhase(session.phase));
        }
        if parsed.is_empty() {
            return Ok(SelectionOutcome::Ignored);
        }

        let collides = parsed.numbers.iter().any(|n| session.selected.contains(n));
        if parsed.has_duplicate || collides {
            session.selected.clear();
            session.deadline_at = Some(now + selection_timeout);
            tracing::info!(session_id = %id, "Duplicate card number, selection restarted");
            return Ok(SelectionOutcome::Restart {
                spread_count: session.spread_count,
            });
        }

        let deck_size = session.deck.as_ref().map(Deck::len).unwrap_or(0);
        let needed = session.remaining();
        session.selected.extend(
            parsed
                .numbers
                .iter()
                .copied()
                .filter(|n| (1..=deck_size).contains(n))
                .take(needed),
        );

        if session.selected.len() < session.spread_count {
            session.deadline_at = Some(now + selection_timeout);
            return Ok(SelectionOutcome::Progress {
                selected: session.selected.clone(),
                remaining: session.remaining(),
            });
        }

        let cards = session
            .deck
            .as_ref()
            .map(|deck| deck.resolve(&session.selected))
            .unwrap_or_default();
        // Interpreting: nothing left for the requester to do, so no deadline
        session.deadline_at = None;
        session.revealed = cards.clone();
        tracing::info!(session_id = %id, positions = ?session.selected, "All cards chosen");
        Ok(SelectionOutcome::Complete { cards })
    }

    /// selecting (cards resolved) -> revealed. No close time until narration
    /// finishes, so the watchdog never closes a reading while it is being read.
    pub fn reveal(&mut self, id: Uuid, interpretation: Interpretation) -> Result<(), SessionError> {
        let session = self.active_mut(id)?;
        if !session.is_interpreting() {
            return Err(SessionError::WrongPhase(session.phase));
        }
        session.phase = Phase::Revealed;
        session.interpretation = Some(interpretation);
        session.auto_close_at = None;
        Ok(())
    }

    /// Start the revealed hold from the moment narration finished
    pub fn hold_after_narration(&mut self, id: Uuid, finished_at: DateTime<Utc>) -> Result<(), SessionError> {
        let hold = self.timeouts.reveal_hold;
        let session = self.active_mut(id)?;
        if session.phase != Phase::Revealed {
            return Err(SessionError::WrongPhase(session.phase));
        }
        session.auto_close_at = Some(finished_at + hold);
        Ok(())
    }

    /// Interpretation failed: short-lived display-only state
    pub fn fail(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<(), SessionError> {
        let hold = self.timeouts.failed_hold;
        let session = self.active_mut(id)?;
        session.phase = Phase::Failed;
        session.deadline_at = None;
        session.auto_close_at = Some(now + hold);
        tracing::warn!(session_id = %id, "Reading failed");
        Ok(())
    }

    /// Any phase -> none
    pub fn cancel(&mut self, id: Uuid) -> Result<ReadingSession, SessionError> {
        self.active_mut(id)?;
        let session = self.current.take().ok_or(SessionError::NotActive)?;
        tracing::info!(session_id = %id, phase = %session.phase, "Reading session closed");
        Ok(session)
    }

    /// Force an overdue session to none. The only mutation the watchdog performs.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<ExpiredSession> {
        if !self.current.as_ref()?.is_overdue(now) {
            return None;
        }
        let session = self.current.take()?;
        tracing::info!(session_id = %session.id, phase = %session.phase, "Reading session expired");
        Some(ExpiredSession {
            phase: session.phase,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::parse_selection;

    fn state() -> SessionState {
        SessionState::new(SessionTimeouts::default())
    }

    fn selecting(state: &mut SessionState, count: usize) -> Uuid {
        state
            .begin_selection("u1", "alice", "love life", count, Deck::ordered(), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_clamp_spread() {
        assert_eq!(clamp_spread(Some(1)), 1);
        assert_eq!(clamp_spread(Some(5)), 5);
        assert_eq!(clamp_spread(Some(9)), 5);
        assert_eq!(clamp_spread(Some(0)), 3);
        assert_eq!(clamp_spread(None), 3);
    }

    #[test]
    fn test_second_start_never_mutates_existing_session() {
        let mut state = state();
        let id = selecting(&mut state, 3);
        let before = state.current().unwrap().clone();

        let err = state
            .begin_topic_question("u2", "bob", Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Busy {
                requester_name: "alice".into()
            }
        );
        assert!(state
            .begin_selection("u2", "bob", "work", 1, Deck::ordered(), Utc::now())
            .is_err());

        let after = state.current().unwrap();
        assert_eq!(after.id, id);
        assert_eq!(after.requester_id, before.requester_id);
        assert_eq!(after.topic, before.topic);
    }

    #[test]
    fn test_duplicate_clears_selection_and_stays_selecting() {
        let mut state = state();
        let id = selecting(&mut state, 3);
        let outcome = state
            .apply_selection(id, &parse_selection("5 5 9", 78), Utc::now())
            .unwrap();
        assert_eq!(outcome, SelectionOutcome::Restart { spread_count: 3 });
        let session = state.current().unwrap();
        assert!(session.selected.is_empty());
        assert_eq!(session.phase, Phase::Selecting);
    }

    #[test]
    fn test_collision_with_earlier_turn_restarts() {
        let mut state = state();
        let id = selecting(&mut state, 3);
        state
            .apply_selection(id, &parse_selection("12", 78), Utc::now())
            .unwrap();
        let outcome = state
            .apply_selection(id, &parse_selection("12 30", 78), Utc::now())
            .unwrap();
        assert_eq!(outcome, SelectionOutcome::Restart { spread_count: 3 });
        assert!(state.current().unwrap().selected.is_empty());
    }

    #[test]
    fn test_selections_accumulate_and_complete_with_exact_count() {
        let mut state = state();
        let id = selecting(&mut state, 3);
        let outcome = state
            .apply_selection(id, &parse_selection("1 2", 78), Utc::now())
            .unwrap();
        assert_eq!(
            outcome,
            SelectionOutcome::Progress {
                selected: vec![1, 2],
                remaining: 1
            }
        );

        let outcome = state
            .apply_selection(id, &parse_selection("3 4 5", 78), Utc::now())
            .unwrap();
        match outcome {
            SelectionOutcome::Complete { cards } => {
                assert_eq!(cards.len(), 3);
                assert_eq!(cards[0].id, "fool");
                assert_eq!(cards[2].id, "high_priestess");
            }
            other => panic!("expected Complete, got {other:?}"),
        }
        let session = state.current().unwrap();
        assert_eq!(session.selected, vec![1, 2, 3]);
        assert!(session.is_interpreting());
        assert!(session.deadline_at.is_none());
    }

    #[test]
    fn test_reveal_then_auto_close() {
        let mut state = state();
        let id = selecting(&mut state, 1);
        state
            .apply_selection(id, &parse_selection("7", 78), Utc::now())
            .unwrap();
        let now = Utc::now();
        state.reveal(id, Interpretation::default()).unwrap();
        assert_eq!(state.phase(), Some(Phase::Revealed));
        // Still narrating: no close time yet
        assert!(state.expire(now + TimeDelta::days(1)).is_none());

        let finished = now + TimeDelta::seconds(20);
        state.hold_after_narration(id, finished).unwrap();
        assert!(state.expire(finished + TimeDelta::seconds(29)).is_none());

        let expired = state.expire(finished + TimeDelta::seconds(31)).unwrap();
        assert_eq!(expired.phase, Phase::Revealed);
        assert!(!expired.needs_apology());
        assert!(state.is_idle());
    }

    #[test]
    fn test_selection_deadline_expires() {
        let mut state = state();
        let start = Utc::now();
        let id = state
            .begin_selection("u1", "alice", "exam", 3, Deck::ordered(), start)
            .unwrap();
        assert!(state.expire(start + TimeDelta::seconds(60)).is_none());
        let expired = state.expire(start + TimeDelta::seconds(121)).unwrap();
        assert!(expired.needs_apology());
        assert_eq!(expired.session.id, id);

        // Mutations keyed by the old id never resurrect it
        assert_eq!(
            state.apply_selection(id, &parse_selection("1", 78), Utc::now()),
            Err(SessionError::NotActive)
        );
    }

    #[test]
    fn test_asking_topic_flow() {
        let mut state = state();
        let now = Utc::now();
        let id = state.begin_topic_question("u1", "alice", now).unwrap();
        assert_eq!(state.phase(), Some(Phase::AskingTopic));
        state
            .choose_topic(id, "career", 9, Deck::ordered(), now)
            .unwrap();
        let session = state.current().unwrap();
        assert_eq!(session.phase, Phase::Selecting);
        assert_eq!(session.spread_count, MAX_SPREAD);
        assert_eq!(session.id, id);
    }

    #[test]
    fn test_asking_topic_has_its_own_deadline() {
        let mut state = state();
        let now = Utc::now();
        state.begin_topic_question("u1", "alice", now).unwrap();
        let expired = state.expire(now + TimeDelta::seconds(61)).unwrap();
        assert_eq!(expired.phase, Phase::AskingTopic);
    }

    #[test]
    fn test_failed_state_closes_quickly() {
        let mut state = state();
        let id = selecting(&mut state, 1);
        let now = Utc::now();
        state.fail(id, now).unwrap();
        assert_eq!(state.phase(), Some(Phase::Failed));
        assert!(state.expire(now + TimeDelta::seconds(6)).is_some());
    }

    #[test]
    fn test_wrong_session_id_rejected() {
        let mut state = state();
        selecting(&mut state, 3);
        let stranger = Uuid::new_v4();
        assert_eq!(
            state.cancel(stranger).unwrap_err(),
            SessionError::WrongSession(stranger)
        );
        assert!(!state.is_idle());
    }

    #[test]
    fn test_ignored_when_no_numbers() {
        let mut state = state();
        let id = selecting(&mut state, 3);
        assert_eq!(
            state
                .apply_selection(id, &parse_selection("hmm let me think", 78), Utc::now())
                .unwrap(),
            SelectionOutcome::Ignored
        );
    }
}
