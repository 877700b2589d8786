// ABOUTME: Core of the streamtalk reply loop: intake, memory, reading sessions, and orchestration
// ABOUTME: Network, audio, and avatar specifics stay behind the collaborator traits

pub mod bus;
pub mod config;
pub mod deck;
pub mod filter;
pub mod generation;
pub mod idle;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod paths;
pub mod presentation;
pub mod prompt;
pub mod reply;
pub mod selection;
pub mod session;
pub mod state;
pub mod traits;
pub mod watchdog;

pub use bus::{intake, IntakeReceiver, IntakeSender};
pub use config::Config;
pub use memory::ConversationMemory;
pub use message::{ConversationTurn, Emotion, InboundMessage, PendingBatch, TurnRole};
pub use orchestrator::ReplyOrchestrator;
pub use state::StreamState;
pub use traits::{AudioHandle, AvatarController, ChatSource, SpeechSynthesizer};

// Re-export model types used at the seams
pub use streamtalk_llm::{LanguageModel, LlmError, ModelRegistry, SharedModel};
