// ABOUTME: Token-budgeted conversational memory with a rolling summary
// ABOUTME: Evicted turns wait in a pending batch until a Summarizer folds them in; state persists under history_dir

use crate::config::MemoryConfig;
use crate::message::{ConversationTurn, PendingBatch, TurnRole};
use crate::paths;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Prefix for the leading context item carrying the rolling summary
pub const SUMMARY_PREFIX: &str = "[previous conversation summary]";

const SUMMARY_FILE: &str = "summary.json";
const SUMMARIES_DIR: &str = "summaries";
const BACKUPS_DIR: &str = "backups";

/// Unsummarized backlog bound, in summary chunks. Older turns are dropped past it.
const MAX_PENDING_CHUNKS: usize = 4;

/// Approximate token count: ceil(chars / 4), 0 for empty text
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Produces a short natural-language digest of evicted turns
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[ConversationTurn]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySettings {
    pub context_tokens: usize,
    pub summary_threshold: usize,
    pub summary_chunk_tokens: usize,
}

impl From<&MemoryConfig> for MemorySettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            context_tokens: config.context_tokens,
            summary_threshold: config.summary_threshold,
            summary_chunk_tokens: config.summary_chunk_tokens,
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        (&MemoryConfig::default()).into()
    }
}

#[derive(Serialize, Deserialize)]
struct SummaryFile {
    summary: String,
    #[serde(default)]
    message_count: usize,
}

#[derive(Serialize)]
struct SummarySnapshot<'a> {
    summary: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct ManualBackup<'a> {
    summary: &'a str,
    messages: Vec<&'a ConversationTurn>,
    message_count: usize,
    current_tokens_approx: usize,
    timestamp: String,
}

pub struct ConversationMemory {
    settings: MemorySettings,
    dir: PathBuf,
    recent: VecDeque<ConversationTurn>,
    token_count: usize,
    rolling_summary: String,
    pending: Vec<ConversationTurn>,
}

impl ConversationMemory {
    /// Open (creating if needed) the history directory and load the persisted summary
    pub fn open(dir: impl Into<PathBuf>, settings: MemorySettings) -> Result<Self> {
        let dir = dir.into();
        for sub in [dir.clone(), dir.join(SUMMARIES_DIR), dir.join(BACKUPS_DIR)] {
            std::fs::create_dir_all(&sub)
                .with_context(|| format!("Failed to create {}", sub.display()))?;
        }

        let rolling_summary = load_summary(&dir.join(SUMMARY_FILE));
        if !rolling_summary.is_empty() {
            tracing::info!(
                chars = rolling_summary.len(),
                "Loaded rolling summary from previous run"
            );
        }

        Ok(Self {
            settings,
            dir,
            recent: VecDeque::new(),
            token_count: 0,
            rolling_summary,
            pending: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.recent.iter()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn rolling_summary(&self) -> &str {
        &self.rolling_summary
    }

    pub fn has_pending_summary(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append a turn; past the threshold the oldest turns move to the pending batch
    pub fn add_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        let turn = ConversationTurn::new(role, content);
        self.token_count += estimate_tokens(&turn.content);
        self.recent.push_back(turn);
        self.evict_over_threshold();
    }

    /// Each batch message becomes one user turn in "name: text" form
    pub fn add_batch(&mut self, batch: &PendingBatch) {
        for line in batch.lines() {
            self.add_turn(TurnRole::User, line);
        }
    }

    fn evict_over_threshold(&mut self) {
        while self.token_count > self.settings.summary_threshold {
            let mut moved = 0;
            while moved < self.settings.summary_chunk_tokens {
                let Some(turn) = self.recent.pop_front() else {
                    break;
                };
                let tokens = estimate_tokens(&turn.content);
                moved += tokens;
                self.token_count -= tokens;
                self.pending.push(turn);
            }
            tracing::debug!(
                moved_tokens = moved,
                remaining_tokens = self.token_count,
                pending = self.pending.len(),
                "Evicted oldest turns for summarization"
            );
            if self.recent.is_empty() {
                break;
            }
        }
        self.cap_pending();
    }

    fn pending_tokens(&self) -> usize {
        self.pending.iter().map(|t| estimate_tokens(&t.content)).sum()
    }

    /// Keeps a failing summarizer from growing the backlog without bound
    fn cap_pending(&mut self) {
        let limit = self.settings.summary_chunk_tokens.max(1) * MAX_PENDING_CHUNKS;
        let mut total = self.pending_tokens();
        let mut dropped = 0;
        while total > limit && dropped + 1 < self.pending.len() {
            total -= estimate_tokens(&self.pending[dropped].content);
            dropped += 1;
        }
        if dropped > 0 {
            self.pending.drain(..dropped);
            tracing::warn!(
                dropped_turns = dropped,
                pending = self.pending.len(),
                "Summary backlog full, dropping oldest unsummarized turns"
            );
        }
    }

    /// Length of the oldest run of pending turns that fits one chunk (at least one turn)
    fn next_chunk_len(&self) -> usize {
        let mut tokens = 0;
        let mut len = 0;
        for turn in &self.pending {
            let turn_tokens = estimate_tokens(&turn.content);
            if len > 0 && tokens + turn_tokens > self.settings.summary_chunk_tokens {
                break;
            }
            tokens += turn_tokens;
            len += 1;
        }
        len
    }

    fn append_summary(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.rolling_summary.is_empty() {
            self.rolling_summary = text.to_string();
        } else {
            self.rolling_summary = format!("{}\n{}", self.rolling_summary.trim_end(), text);
        }
    }

    /// Fold the pending batch into the rolling summary, one chunk per summarizer call.
    ///
    /// Returns Ok(false) when nothing was pending. If the summarizer fails the
    /// unfolded turns stay pending and the error is returned.
    pub async fn flush_pending_summary(&mut self, summarizer: &dyn Summarizer) -> Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }

        let mut folded = 0;
        let mut failure = None;
        while !self.pending.is_empty() {
            let len = self.next_chunk_len();
            match summarizer.summarize(&self.pending[..len]).await {
                Ok(text) => {
                    self.append_summary(text.trim());
                    self.pending.drain(..len);
                    folded += len;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if folded > 0 {
            self.persist_summary().await?;
            let snapshot = self.write_summary_snapshot().await?;
            tracing::info!(
                folded_turns = folded,
                snapshot = %snapshot.display(),
                "Rolling summary updated"
            );
        }
        match failure {
            Some(e) => Err(e.context("Summarizer failed; turns stay pending")),
            None => Ok(true),
        }
    }

    /// Summary (as one leading system item) followed by the newest turns that fit the context budget
    pub fn context_for_next_call(&self) -> Vec<ConversationTurn> {
        let mut out = Vec::new();
        if !self.rolling_summary.is_empty() {
            out.push(ConversationTurn::new(
                TurnRole::System,
                format!("{} {}", SUMMARY_PREFIX, self.rolling_summary),
            ));
        }

        let mut used = 0;
        let mut newest_first = Vec::new();
        for turn in self.recent.iter().rev() {
            let tokens = estimate_tokens(&turn.content);
            if used + tokens > self.settings.context_tokens {
                break;
            }
            used += tokens;
            newest_first.push(turn.clone());
        }
        out.extend(newest_first.into_iter().rev());
        out
    }

    /// Write summary plus the full window to backups/backup_<ts>.json
    pub async fn manual_snapshot(&self) -> Result<PathBuf> {
        let now = Utc::now();
        let path = self
            .dir
            .join(BACKUPS_DIR)
            .join(format!("backup_{}.json", now.format("%Y%m%d_%H%M%S_%3f")));
        let backup = ManualBackup {
            summary: &self.rolling_summary,
            messages: self.recent.iter().collect(),
            message_count: self.recent.len(),
            current_tokens_approx: self.token_count,
            timestamp: now.to_rfc3339(),
        };
        let body = serde_json::to_string_pretty(&backup)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), turns = self.recent.len(), "Manual memory backup saved");
        Ok(path)
    }

    /// Take a manual snapshot if the sentinel file exists, then remove it
    pub async fn snapshot_if_requested(&self) -> Result<Option<PathBuf>> {
        let sentinel = paths::backup_sentinel(&self.dir);
        if !tokio::fs::try_exists(&sentinel).await.unwrap_or(false) {
            return Ok(None);
        }
        let path = self.manual_snapshot().await?;
        if let Err(e) = tokio::fs::remove_file(&sentinel).await {
            tracing::warn!(error = %e, path = %sentinel.display(), "Failed to remove backup sentinel");
        }
        Ok(Some(path))
    }

    async fn persist_summary(&self) -> Result<()> {
        let path = self.dir.join(SUMMARY_FILE);
        let body = serde_json::to_string_pretty(&SummaryFile {
            summary: self.rolling_summary.clone(),
            message_count: self.recent.len(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn write_summary_snapshot(&self) -> Result<PathBuf> {
        let now = Utc::now();
        let path = self
            .dir
            .join(SUMMARIES_DIR)
            .join(format!("summary_{}.json", now.format("%Y%m%d_%H%M%S_%3f")));
        let body = serde_json::to_string(&SummarySnapshot {
            summary: &self.rolling_summary,
            timestamp: now.to_rfc3339(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Recompute the token total from the window; equals token_count()
    pub fn recount(&self) -> usize {
        self.recent.iter().map(|t| estimate_tokens(&t.content)).sum()
    }
}

fn load_summary(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    match serde_json::from_str::<SummaryFile>(&content) {
        Ok(file) => file.summary.trim().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Ignoring unreadable summary file");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSummarizer {
        calls: AtomicUsize,
        largest_call: AtomicUsize,
        fail: bool,
    }

    impl CountingSummarizer {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                largest_call: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, turns: &[ConversationTurn]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.largest_call.fetch_max(turns.len(), Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("model unavailable");
            }
            Ok(format!("{} turns about tea", turns.len()))
        }
    }

    fn small_settings() -> MemorySettings {
        MemorySettings {
            context_tokens: 10,
            summary_threshold: 20,
            summary_chunk_tokens: 8,
        }
    }

    // 16 chars -> 4 tokens
    const FOUR_TOKENS: &str = "abcdefghijklmnop";

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // Counted in characters, not bytes
        assert_eq!(estimate_tokens("안녕하세요"), 2);
    }

    #[test]
    fn test_token_count_matches_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        for i in 0..12 {
            memory.add_turn(TurnRole::User, format!("{}{}", FOUR_TOKENS, i));
            assert_eq!(memory.token_count(), memory.recount());
            assert!(memory.token_count() <= 20);
        }
        assert!(memory.has_pending_summary());
    }

    #[test]
    fn test_eviction_moves_oldest_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        for _ in 0..5 {
            memory.add_turn(TurnRole::User, FOUR_TOKENS);
        }
        assert_eq!(memory.token_count(), 20);
        assert!(!memory.has_pending_summary());

        memory.add_turn(TurnRole::Assistant, FOUR_TOKENS);
        // 24 > 20: two oldest turns (8 tokens) move out
        assert_eq!(memory.pending_len(), 2);
        assert_eq!(memory.len(), 4);
        assert_eq!(memory.token_count(), 16);
    }

    #[test]
    fn test_context_takes_newest_turns_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        memory.add_turn(TurnRole::User, "first-turn-aaaaa"); // 4
        memory.add_turn(TurnRole::Assistant, "second-turn-bbbb"); // 4
        memory.add_turn(TurnRole::User, "third-turn-ccccc"); // 4
        let ctx = memory.context_for_next_call();
        // Budget 10 fits two 4-token turns
        let contents: Vec<&str> = ctx.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["second-turn-bbbb", "third-turn-ccccc"]);
    }

    #[test]
    fn test_context_stops_at_first_turn_that_does_not_fit() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        memory.add_turn(TurnRole::User, "tiny");
        memory.add_turn(TurnRole::User, "x".repeat(40)); // 10 tokens
        memory.add_turn(TurnRole::User, "end!");
        let ctx = memory.context_for_next_call();
        // The 10-token turn does not fit after "end!", so "tiny" is never reached
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].content, "end!");
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        for _ in 0..6 {
            memory.add_turn(TurnRole::User, FOUR_TOKENS);
        }
        let summarizer = CountingSummarizer::ok();
        assert!(memory.flush_pending_summary(&summarizer).await.unwrap());
        let summary = memory.rolling_summary().to_string();
        assert_eq!(summary, "2 turns about tea");

        assert!(!memory.flush_pending_summary(&summarizer).await.unwrap());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(memory.rolling_summary(), summary);
    }

    #[tokio::test]
    async fn test_failed_summary_keeps_turns_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        for _ in 0..6 {
            memory.add_turn(TurnRole::User, FOUR_TOKENS);
        }
        let failing = CountingSummarizer::failing();
        assert!(memory.flush_pending_summary(&failing).await.is_err());
        assert_eq!(memory.pending_len(), 2);
        assert!(memory.rolling_summary().is_empty());

        let ok = CountingSummarizer::ok();
        assert!(memory.flush_pending_summary(&ok).await.unwrap());
        assert!(!memory.has_pending_summary());
    }

    #[tokio::test]
    async fn test_backlog_stays_bounded_while_summarizer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        let failing = CountingSummarizer::failing();
        for _ in 0..100 {
            memory.add_turn(TurnRole::User, FOUR_TOKENS);
            if memory.has_pending_summary() {
                assert!(memory.flush_pending_summary(&failing).await.is_err());
            }
            // Four chunks of 8 tokens
            assert!(memory.pending_tokens() <= 32);
        }
        // Every attempt sent one chunk, never the whole backlog
        assert_eq!(failing.largest_call.load(Ordering::SeqCst), 2);
        assert_eq!(memory.pending_len(), 8);

        let ok = CountingSummarizer::ok();
        assert!(memory.flush_pending_summary(&ok).await.unwrap());
        assert!(!memory.has_pending_summary());
        assert_eq!(ok.calls.load(Ordering::SeqCst), 4);
        assert_eq!(ok.largest_call.load(Ordering::SeqCst), 2);
        assert_eq!(memory.rolling_summary().lines().count(), 4);
        assert_eq!(memory.token_count(), memory.recount());
    }

    #[tokio::test]
    async fn test_summary_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
            for _ in 0..6 {
                memory.add_turn(TurnRole::User, FOUR_TOKENS);
            }
            memory
                .flush_pending_summary(&CountingSummarizer::ok())
                .await
                .unwrap();
        }
        let snapshots = std::fs::read_dir(dir.path().join("summaries"))
            .unwrap()
            .count();
        assert_eq!(snapshots, 1);

        let reopened = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        assert_eq!(reopened.rolling_summary(), "2 turns about tea");
        let ctx = reopened.context_for_next_call();
        assert_eq!(ctx[0].role, TurnRole::System);
        assert!(ctx[0].content.starts_with(SUMMARY_PREFIX));
    }

    #[tokio::test]
    async fn test_sentinel_triggers_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = ConversationMemory::open(dir.path(), small_settings()).unwrap();
        memory.add_turn(TurnRole::User, "alice: hi");

        assert!(memory.snapshot_if_requested().await.unwrap().is_none());

        std::fs::write(paths::backup_sentinel(dir.path()), "").unwrap();
        let path = memory.snapshot_if_requested().await.unwrap().unwrap();
        assert!(path.starts_with(dir.path().join("backups")));
        assert!(!paths::backup_sentinel(dir.path()).exists());

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["message_count"], 1);
        assert_eq!(body["messages"][0]["content"], "alice: hi");

        assert!(memory.snapshot_if_requested().await.unwrap().is_none());
    }
}
