// ABOUTME: Request types passed to language-model backends.
// ABOUTME: Chat messages with roles, plus a purpose tag used for logging, metrics, and mocks.

use serde::{Deserialize, Serialize};

/// Role of a message in a chat-completion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single chat message sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Why a request is being made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPurpose {
    /// Batch reply to viewer chat
    Reply,
    /// Interpreting the requester's input during card selection
    Selection,
    /// Interpretation of revealed cards
    Interpretation,
    /// Folding evicted turns into the rolling summary
    Summary,
}

impl RequestPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Selection => "selection",
            Self::Interpretation => "interpretation",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete chat-completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub purpose: RequestPurpose,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    /// Ask the backend to constrain output to a JSON object
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(purpose: RequestPurpose, messages: Vec<ChatMessage>) -> Self {
        Self {
            purpose,
            messages,
            max_tokens: 1024,
            json_output: true,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn plain_text(mut self) -> Self {
        self.json_output = false;
        self
    }

    /// Append a follow-up message, used for corrective retries
    pub fn followed_by(&self, message: ChatMessage) -> Self {
        let mut next = self.clone();
        next.messages.push(message);
        next
    }

    /// All message contents joined by newlines
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
