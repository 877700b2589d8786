// ABOUTME: Binary-side modules: CLI, logging, speech backends, chat sources, and the overlay server
// ABOUTME: The reply loop and its state live in streamtalk-core; this crate wires real I/O to it

pub mod app;
pub mod chat;
pub mod cli;
pub mod logging;
pub mod overlay;
pub mod speech;

// Re-export platform-agnostic modules from streamtalk-core
pub use streamtalk_core::config;
pub use streamtalk_core::metrics;
pub use streamtalk_core::paths;
