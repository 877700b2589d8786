// ABOUTME: Presentation feeds read by the browser overlay: viewer chat, assistant lines, session view
// ABOUTME: Each feed is bounded, every entry is timestamped, and old entries age out past a horizon

use crate::message::{Emotion, InboundMessage};
use crate::session::ReadingSession;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerEntry {
    pub id: u64,
    pub user: String,
    pub message: String,
    /// Set once an orchestrator cycle has consumed the message
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantEntry {
    pub message: String,
    pub emotion: Emotion,
    pub created_at: DateTime<Utc>,
}

/// Everything the overlay needs for one render
#[derive(Debug, Clone, Serialize)]
pub struct OverlaySnapshot {
    pub viewer_messages: Vec<ViewerEntry>,
    pub assistant_messages: Vec<AssistantEntry>,
    pub session: Option<ReadingSession>,
}

#[derive(Debug)]
pub struct OverlayFeed {
    viewer: VecDeque<ViewerEntry>,
    assistant: VecDeque<AssistantEntry>,
    max_entries: usize,
    next_id: u64,
}

impl OverlayFeed {
    pub fn new(max_entries: usize) -> Self {
        Self {
            viewer: VecDeque::new(),
            assistant: VecDeque::new(),
            max_entries: max_entries.max(1),
            next_id: 1,
        }
    }

    /// Record an incoming message and return its feed id
    pub fn push_viewer(&mut self, message: &InboundMessage) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.viewer.push_back(ViewerEntry {
            id,
            user: message.sender_name.clone(),
            message: message.text.clone(),
            processed: false,
            created_at: message.received_at,
        });
        while self.viewer.len() > self.max_entries {
            self.viewer.pop_front();
        }
        id
    }

    pub fn push_assistant(&mut self, text: &str, emotion: Emotion, now: DateTime<Utc>) {
        self.assistant.push_back(AssistantEntry {
            message: text.to_string(),
            emotion,
            created_at: now,
        });
        while self.assistant.len() > self.max_entries {
            self.assistant.pop_front();
        }
    }

    /// Returns how many entries were still visible to mark
    pub fn mark_processed(&mut self, ids: &[u64]) -> usize {
        let mut marked = 0;
        for entry in self.viewer.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.processed = true;
            marked += 1;
        }
        marked
    }

    /// Drop entries older than the horizon
    pub fn prune(&mut self, now: DateTime<Utc>, horizon: TimeDelta) {
        let cutoff = now - horizon;
        self.viewer.retain(|e| e.created_at >= cutoff);
        self.assistant.retain(|e| e.created_at >= cutoff);
    }

    pub fn clear(&mut self) {
        self.viewer.clear();
        self.assistant.clear();
    }

    pub fn viewer(&self) -> impl Iterator<Item = &ViewerEntry> {
        self.viewer.iter()
    }

    pub fn assistant(&self) -> impl Iterator<Item = &AssistantEntry> {
        self.assistant.iter()
    }

    pub fn snapshot(&self, session: Option<ReadingSession>) -> OverlaySnapshot {
        OverlaySnapshot {
            viewer_messages: self.viewer.iter().cloned().collect(),
            assistant_messages: self.assistant.iter().cloned().collect(),
            session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_is_bounded_and_ids_increase() {
        let mut feed = OverlayFeed::new(2);
        let a = feed.push_viewer(&InboundMessage::new("1", "a", "one"));
        let b = feed.push_viewer(&InboundMessage::new("2", "b", "two"));
        let c = feed.push_viewer(&InboundMessage::new("3", "c", "three"));
        assert!(a < b && b < c);
        let users: Vec<&str> = feed.viewer().map(|e| e.user.as_str()).collect();
        assert_eq!(users, vec!["b", "c"]);
    }

    #[test]
    fn test_mark_processed_only_touches_given_ids() {
        let mut feed = OverlayFeed::new(10);
        let a = feed.push_viewer(&InboundMessage::new("1", "a", "one"));
        feed.push_viewer(&InboundMessage::new("2", "b", "two"));
        assert_eq!(feed.mark_processed(&[a, 999]), 1);
        let processed: Vec<bool> = feed.viewer().map(|e| e.processed).collect();
        assert_eq!(processed, vec![true, false]);
    }

    #[test]
    fn test_prune_ages_out_old_entries() {
        let mut feed = OverlayFeed::new(10);
        let mut old = InboundMessage::new("1", "a", "old");
        old.received_at = Utc::now() - TimeDelta::seconds(600);
        feed.push_viewer(&old);
        feed.push_viewer(&InboundMessage::new("2", "b", "new"));
        feed.push_assistant("hi", Emotion::Happy, Utc::now() - TimeDelta::seconds(400));

        feed.prune(Utc::now(), TimeDelta::seconds(300));
        assert_eq!(feed.viewer().count(), 1);
        assert_eq!(feed.assistant().count(), 0);
    }

    #[test]
    fn test_clear_resets_feeds() {
        let mut feed = OverlayFeed::new(10);
        feed.push_viewer(&InboundMessage::new("1", "a", "one"));
        feed.push_assistant("hi", Emotion::Neutral, Utc::now());
        feed.clear();
        let snapshot = feed.snapshot(None);
        assert!(snapshot.viewer_messages.is_empty());
        assert!(snapshot.assistant_messages.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_columns() {
        let mut feed = OverlayFeed::new(10);
        feed.push_assistant("hello", Emotion::Excited, Utc::now());
        let json = serde_json::to_value(feed.snapshot(None)).unwrap();
        assert_eq!(json["assistant_messages"][0]["emotion"], "excited");
        assert!(json["session"].is_null());
    }
}
