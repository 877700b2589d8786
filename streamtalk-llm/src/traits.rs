// ABOUTME: Core LanguageModel trait that all backends implement.
// ABOUTME: A single request/response call; streaming is not needed for one-line chat replies.

use crate::{CompletionRequest, LlmError};
use async_trait::async_trait;
use std::sync::Arc;

/// Core trait that all language-model backends implement.
///
/// The call is treated as a black box: one request in, the raw text of the
/// first choice out. Parsing the text is the caller's job.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Send a request and return the raw completion text
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Shared handle to a backend
pub type SharedModel = Arc<dyn LanguageModel>;
