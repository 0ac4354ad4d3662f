//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Body fragments that identify a content-safety rejection.
const CONTENT_POLICY_MARKERS: &[&str] = &["content exists risk", "content_filter", "content_policy"];

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The endpoint replied with a body that is not a chat completion.
    #[error("malformed completion response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Check if this is a content-safety rejection.
    ///
    /// Providers answer HTTP 400 with a marker in the body (DeepSeek:
    /// `Content Exists Risk`; OpenAI-style: `content_filter`/`content_policy`).
    pub fn is_content_policy_rejection(&self) -> bool {
        match self {
            InferenceError::HttpError { status: 400, body } => {
                let body = body.to_lowercase();
                CONTENT_POLICY_MARKERS.iter().any(|m| body.contains(m))
            }
            _ => false,
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}
