// ABOUTME: Mock model for testing - returns pre-configured completions.
// ABOUTME: Allows deterministic tests of reply flows without a network.
//!
//! # Example
//!
//! ```
//! use streamtalk_llm::backends::mock::MockModel;
//! use streamtalk_llm::{ChatMessage, CompletionRequest, LanguageModel, RequestPurpose};
//!
//! # async fn example() {
//! let mock = MockModel::new()
//!     .on_prompt("hello").respond_text(r#"{"replies":[{"response":"hi"}]}"#);
//!
//! let req = CompletionRequest::new(RequestPurpose::Reply, vec![ChatMessage::user("hello")]);
//! let text = mock.complete(req).await.unwrap();
//! assert!(text.contains("hi"));
//! # }
//! ```

use crate::{CompletionRequest, LanguageModel, LlmError, RequestPurpose};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock model for testing. Clones share expectations and call history.
#[derive(Clone, Default)]
pub struct MockModel {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

struct Expectation {
    pattern: String,
    purpose: Option<RequestPurpose>,
    outcome: Result<String, LlmError>,
}

impl Expectation {
    fn matches(&self, request: &CompletionRequest, transcript: &str) -> bool {
        self.purpose.map_or(true, |p| p == request.purpose) && transcript.contains(&self.pattern)
    }
}

impl MockModel {
    /// Create a new mock model with no expectations
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up an expectation for a request whose messages contain the pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            model: self,
            pattern: pattern.to_string(),
            purpose: None,
        }
    }

    /// Set up an expectation for any request with the given purpose
    pub fn on_purpose(self, purpose: RequestPurpose) -> ExpectationBuilder {
        ExpectationBuilder {
            model: self,
            pattern: String::new(),
            purpose: Some(purpose),
        }
    }

    /// Every request received so far, in order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of expectations not yet consumed
    pub fn pending(&self) -> usize {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::ModelFactory {
        Box::new(|_config| Ok(Arc::new(MockModel::new())))
    }

    fn push(&self, expectation: Expectation) {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(expectation);
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let transcript = request.transcript();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        // FIFO preference: take the front if it matches, otherwise the first match
        let outcome = {
            let mut exp = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
            let index = match exp.front() {
                Some(front) if front.matches(&request, &transcript) => Some(0),
                Some(_) => exp.iter().position(|e| e.matches(&request, &transcript)),
                None => None,
            };
            index.and_then(|i| exp.remove(i)).map(|e| e.outcome)
        };

        match outcome {
            Some(outcome) => outcome,
            None => {
                tracing::debug!(purpose = %request.purpose, "Mock model has no matching expectation");
                Err(LlmError::Backend(format!(
                    "mock: no expectation for {} request",
                    request.purpose
                )))
            }
        }
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    model: MockModel,
    pattern: String,
    purpose: Option<RequestPurpose>,
}

impl ExpectationBuilder {
    /// Restrict the expectation to requests with this purpose
    pub fn for_purpose(mut self, purpose: RequestPurpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    /// Respond with raw completion text
    pub fn respond_text(self, text: &str) -> MockModel {
        self.finish(Ok(text.to_string()))
    }

    /// Respond with a JSON value serialized as the completion text
    pub fn respond_json(self, value: serde_json::Value) -> MockModel {
        self.finish(Ok(value.to_string()))
    }

    /// Respond with an error
    pub fn respond_error(self, error: LlmError) -> MockModel {
        self.finish(Err(error))
    }

    fn finish(self, outcome: Result<String, LlmError>) -> MockModel {
        self.model.push(Expectation {
            pattern: self.pattern,
            purpose: self.purpose,
            outcome,
        });
        self.model
    }
}
