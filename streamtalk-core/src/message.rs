// ABOUTME: Inbound chat messages, batches, conversation turns, and the emotion set
// ABOUTME: Shared data types passed between the intake queue, memory, and the reply loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Inbound Messages
// =============================================================================

/// A chat message received from the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Presentation feed id, assigned when the message is enqueued
    #[serde(default)]
    pub id: u64,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub is_from_channel_owner: bool,
}

impl InboundMessage {
    pub fn new(
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            text: text.into(),
            received_at: Utc::now(),
            is_from_channel_owner: false,
        }
    }

    pub fn from_owner(mut self) -> Self {
        self.is_from_channel_owner = true;
        self
    }

    /// "name: text" form used in prompts and memory
    pub fn as_line(&self) -> String {
        format!("{}: {}", self.sender_name, self.text.trim())
    }
}

/// Messages collected for one orchestrator cycle. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch(Vec<InboundMessage>);

impl PendingBatch {
    /// Returns None for an empty list
    pub fn new(messages: Vec<InboundMessage>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self(messages))
        }
    }

    /// Build from the message that woke the loop plus whatever was drained after it
    pub fn from_first(first: InboundMessage, rest: Vec<InboundMessage>) -> Self {
        let mut messages = Vec::with_capacity(rest.len() + 1);
        messages.push(first);
        messages.extend(rest);
        Self(messages)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    // Clippy wants this alongside len(); always false by construction
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[InboundMessage] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InboundMessage> {
        self.0.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.0.iter().map(|m| m.id).collect()
    }

    /// Prompt lines in arrival order
    pub fn lines(&self) -> Vec<String> {
        self.0.iter().map(InboundMessage::as_line).collect()
    }

    pub fn into_messages(self) -> Vec<InboundMessage> {
        self.0
    }
}

// =============================================================================
// Conversation Turns
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One entry in conversational memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn to_chat_message(&self) -> streamtalk_llm::ChatMessage {
        use streamtalk_llm::ChatMessage;
        match self.role {
            TurnRole::User => ChatMessage::user(self.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(self.content.clone()),
            TurnRole::System => ChatMessage::system(self.content.clone()),
        }
    }
}

// =============================================================================
// Emotion
// =============================================================================

/// Expression attached to each reply; drives avatar and voice reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    #[default]
    Neutral,
    Excited,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Neutral,
        Emotion::Excited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
            Self::Neutral => "neutral",
            Self::Excited => "excited",
        }
    }

    /// Unknown or missing labels fall back to neutral
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == lowered)
            .ok_or_else(|| format!("unknown emotion: {}", s))
    }
}
