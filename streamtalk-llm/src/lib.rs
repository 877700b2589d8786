// ABOUTME: Pluggable language-model backend abstraction for streamtalk.
// ABOUTME: Provides the LanguageModel trait, request types, an HTTP backend, and a scripted mock.

pub mod backends;
pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod traits;

pub use config::ModelConfig;
pub use error::LlmError;
pub use message::{ChatMessage, ChatRole, CompletionRequest, RequestPurpose};
pub use registry::{ModelFactory, ModelRegistry};
pub use traits::{LanguageModel, SharedModel};
