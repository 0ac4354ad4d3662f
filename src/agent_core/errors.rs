//! Agent core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Message store operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// The LLM completion call failed.
    #[error("completion failed: {0}")]
    Completion(#[from] InferenceError),

    /// A tool call failed at the transport or protocol layer.
    #[error("tool execution failed: {0}")]
    Tool(#[from] McpError),

    /// A tool result did not answer a pending call of the preceding assistant message.
    #[error("tool result '{tool_call_id}' does not answer a pending tool call")]
    UnmatchedToolResult { tool_call_id: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
