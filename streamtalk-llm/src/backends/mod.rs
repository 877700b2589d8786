// ABOUTME: Language-model backend implementations.
// ABOUTME: OpenAI-compatible HTTP backend and a scripted mock for tests.

pub mod mock;
pub mod openai;
