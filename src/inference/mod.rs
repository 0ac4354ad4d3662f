//! Inference client — OpenAI-compatible chat completions.
//!
//! The agent depends only on [`CompletionBackend`]; [`InferenceClient`] is
//! the HTTP implementation used in production. Switching providers is a
//! config change (`model.base_url`, `model.model`), not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

pub use client::{CompletionBackend, InferenceClient};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, Completion, Role, TokenUsage, ToolCall, ToolDefinition};
