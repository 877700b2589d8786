// ABOUTME: StreamState, the shared service object holding session and presentation state
// ABOUTME: Also owns the speaking flag and the watchdog-to-orchestrator wake signal

use crate::message::{Emotion, InboundMessage};
use crate::presentation::{OverlayFeed, OverlaySnapshot};
use crate::session::{ExpiredSession, SessionState, SessionTimeouts};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Critical sections are short and never span an await, so std mutexes are enough
pub struct StreamState {
    session: Mutex<SessionState>,
    feed: Mutex<OverlayFeed>,
    expired: Mutex<Vec<ExpiredSession>>,
    speaking: Arc<AtomicBool>,
    wake: Notify,
    reading_enabled: bool,
    horizon: TimeDelta,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl StreamState {
    pub fn new(timeouts: SessionTimeouts, max_entries: usize, horizon: TimeDelta, reading_enabled: bool) -> Self {
        Self {
            session: Mutex::new(SessionState::new(timeouts)),
            feed: Mutex::new(OverlayFeed::new(max_entries)),
            expired: Mutex::new(Vec::new()),
            speaking: Arc::new(AtomicBool::new(false)),
            wake: Notify::new(),
            reading_enabled,
            horizon,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let horizon = TimeDelta::seconds(i64::try_from(config.overlay.horizon_secs).unwrap_or(i64::MAX / 1000));
        Self::new(
            SessionTimeouts::from(&config.reading),
            config.overlay.max_entries,
            horizon,
            config.reading.enabled,
        )
    }

    pub fn reading_enabled(&self) -> bool {
        self.reading_enabled
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    pub fn with_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut lock(&self.session))
    }

    /// Expire an overdue session and queue it for the orchestrator to announce
    pub fn expire_sessions(&self, now: DateTime<Utc>) -> bool {
        let expired = self.with_session(|s| s.expire(now));
        match expired {
            Some(expired) => {
                crate::metrics::record_session("expired");
                lock(&self.expired).push(expired);
                self.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Sessions expired since the last call, oldest first
    pub fn take_expired(&self) -> Vec<ExpiredSession> {
        std::mem::take(&mut *lock(&self.expired))
    }

    /// Resolves when the watchdog has expired something
    pub async fn woken(&self) {
        self.wake.notified().await
    }

    // -------------------------------------------------------------------------
    // Presentation
    // -------------------------------------------------------------------------

    /// Add to the viewer feed, returning the feed id to stamp on the message
    pub fn record_incoming(&self, message: &InboundMessage) -> u64 {
        lock(&self.feed).push_viewer(message)
    }

    pub fn mark_processed(&self, ids: &[u64]) {
        lock(&self.feed).mark_processed(ids);
    }

    pub fn push_assistant(&self, text: &str, emotion: Emotion) {
        lock(&self.feed).push_assistant(text, emotion, Utc::now());
    }

    pub fn clear_feeds(&self) {
        lock(&self.feed).clear();
        tracing::info!("Overlay feeds cleared");
    }

    /// Aged-out entries are dropped before the snapshot is taken
    pub fn snapshot(&self) -> OverlaySnapshot {
        let session = self.with_session(|s| s.current().cloned());
        let mut feed = lock(&self.feed);
        feed.prune(Utc::now(), self.horizon);
        feed.snapshot(session)
    }

    // -------------------------------------------------------------------------
    // Speaking flag
    // -------------------------------------------------------------------------

    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.speaking)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Hold for the whole synthesis and playback of one line
    pub fn begin_speaking(&self) -> SpeakingGuard {
        SpeakingGuard::new(Arc::clone(&self.speaking))
    }
}

/// Clears the speaking flag when dropped
#[must_use = "the speaking flag is cleared when the guard drops"]
pub struct SpeakingGuard {
    flag: Arc<AtomicBool>,
}

impl SpeakingGuard {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::Deck;

    fn state() -> StreamState {
        StreamState::new(SessionTimeouts::default(), 50, TimeDelta::seconds(300), true)
    }

    #[test]
    fn test_speaking_guard_resets_flag() {
        let state = state();
        assert!(!state.is_speaking());
        {
            let _guard = state.begin_speaking();
            assert!(state.is_speaking());
            assert!(state.speaking_flag().load(Ordering::SeqCst));
        }
        assert!(!state.is_speaking());
    }

    #[tokio::test]
    async fn test_expiry_queues_notice_and_wakes() {
        let state = state();
        let start = Utc::now();
        state.with_session(|s| {
            s.begin_selection("u1", "alice", "exam", 3, Deck::ordered(), start)
                .unwrap()
        });
        assert!(!state.expire_sessions(start));
        assert!(state.expire_sessions(start + TimeDelta::seconds(200)));

        // The permit is stored, so this resolves immediately
        state.woken().await;
        let expired = state.take_expired();
        assert_eq!(expired.len(), 1);
        assert!(state.take_expired().is_empty());
        assert!(state.with_session(|s| s.is_idle()));
    }

    #[test]
    fn test_snapshot_includes_session() {
        let state = state();
        let id = state.record_incoming(&InboundMessage::new("u1", "alice", "hi"));
        state.mark_processed(&[id]);
        state.with_session(|s| s.begin_topic_question("u1", "alice", Utc::now()).unwrap());

        let snapshot = state.snapshot();
        assert!(snapshot.viewer_messages[0].processed);
        assert_eq!(snapshot.session.unwrap().requester_name, "alice");
    }
}
