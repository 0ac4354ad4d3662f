//! MCP client error types.

use thiserror::Error;

/// Errors that can occur during transport, client and routing operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The peer could not be reached (refused, DNS, closed pipe).
    #[error("connection to '{server}' failed: {reason}")]
    ConnectionFailed {
        server: String,
        reason: String,
    },

    /// No reply arrived within the bound for this call.
    #[error("'{method}' on '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The reply body is not a valid protocol message.
    #[error("malformed response from '{server}': {reason}")]
    MalformedResponse {
        server: String,
        reason: String,
    },

    /// The peer answered with a well-formed JSON-RPC error object.
    #[error("server error [{code}]: {message}")]
    ProtocolError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A reply did not correlate with the request it answered.
    #[error("protocol violation on '{server}': expected reply id {expected}, got {got}")]
    ProtocolViolation {
        server: String,
        expected: u64,
        got: String,
    },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// No client serves the requested tool.
    #[error("tool '{name}' not found. Available tools: {}", format_available(available))]
    ToolNotFound {
        name: String,
        available: Vec<String>,
    },

    /// The client or transport was closed (or poisoned by an earlier violation).
    #[error("connection to '{server}' is closed")]
    Closed {
        server: String,
    },

    /// Configuration error (bad URL, missing command).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

fn format_available(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

impl McpError {
    /// `true` for failures of the underlying substrate rather than the peer's logic.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionFailed { .. }
                | McpError::Timeout { .. }
                | McpError::MalformedResponse { .. }
                | McpError::ProtocolViolation { .. }
                | McpError::Closed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_lists_alternatives() {
        let err = McpError::ToolNotFound {
            name: "forecast".into(),
            available: vec!["reminder".into(), "search_news".into()],
        };
        assert_eq!(
            err.to_string(),
            "tool 'forecast' not found. Available tools: reminder, search_news"
        );
    }

    #[test]
    fn test_tool_not_found_with_empty_registry() {
        let err = McpError::ToolNotFound {
            name: "x".into(),
            available: vec![],
        };
        assert!(err.to_string().ends_with("Available tools: none"));
    }

    #[test]
    fn test_is_transport() {
        assert!(McpError::Closed { server: "a".into() }.is_transport());
        assert!(!McpError::ProtocolError {
            code: -32602,
            message: "bad".into(),
            data: None
        }
        .is_transport());
    }
}
