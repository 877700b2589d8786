// ABOUTME: Typed errors returned by language-model backends.
// ABOUTME: Callers branch on rate limiting and invalid-JSON failures to decide on retries.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    /// Backend refused the request because of a rate limit; callers must not retry immediately
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Backend rejected its own output as invalid JSON
    #[error("model produced invalid JSON")]
    InvalidJson { failed_generation: Option<String> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("backend error: {0}")]
    Backend(String),
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidJson { .. } => "invalid_json",
            Self::Auth(_) => "auth",
            Self::Http { .. } => "http",
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::EmptyResponse => "empty",
            Self::Backend(_) => "backend",
        }
    }
}
