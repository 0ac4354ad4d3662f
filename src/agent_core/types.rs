//! Shared types for the agent core.
//!
//! Transcript messages, persisted records, UI events, and the per-turn
//! outcome returned by the orchestrator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::types::{ChatMessage, Role, TokenUsage, ToolCall};

// ─── Conversation Messages ──────────────────────────────────────────────────

/// One entry of a turn's working transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    /// Answers the call with the same id in the preceding assistant message.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ConversationMessage {
    pub fn role(&self) -> Role {
        match self {
            ConversationMessage::System { .. } => Role::System,
            ConversationMessage::User { .. } => Role::User,
            ConversationMessage::Assistant { .. } => Role::Assistant,
            ConversationMessage::Tool { .. } => Role::Tool,
        }
    }

    /// Convert to the wire shape sent to the completion endpoint.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self {
            ConversationMessage::System { content } => ChatMessage::system(content.clone()),
            ConversationMessage::User { content } => ChatMessage::user(content.clone()),
            ConversationMessage::Assistant {
                content,
                tool_calls,
            } => ChatMessage {
                role: Role::Assistant,
                content: content.clone(),
                tool_call_id: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls.iter().map(ToolCall::to_response).collect())
                },
            },
            ConversationMessage::Tool {
                tool_call_id,
                content,
            } => ChatMessage {
                role: Role::Tool,
                content: Some(content.clone()),
                tool_call_id: Some(tool_call_id.clone()),
                tool_calls: None,
            },
        }
    }
}

// ─── Persistence ────────────────────────────────────────────────────────────

/// A persisted conversation record.
///
/// Only user messages and final assistant answers are persisted; tool
/// traffic stays inside the turn that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

// ─── UI Events ──────────────────────────────────────────────────────────────

/// Messages published to the UI, in the order they are produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Assistant text produced mid-turn, before any tool calls run.
    Intermediate(String),
    /// End of a turn: remaining content plus timing metadata.
    Final(String),
    /// A reminder summary written to the side transcript.
    Reminder(String),
    /// A recoverable problem (for example a failed reminder tick).
    Warning(String),
    /// A turn that could not complete.
    Error(String),
}

impl ChatEvent {
    pub fn text(&self) -> &str {
        match self {
            ChatEvent::Intermediate(t)
            | ChatEvent::Final(t)
            | ChatEvent::Reminder(t)
            | ChatEvent::Warning(t)
            | ChatEvent::Error(t) => t,
        }
    }
}

// ─── Turn Outcome ───────────────────────────────────────────────────────────

/// Start or stop request for the reminder poller, derived from a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderCommand {
    Start { interval: Duration },
    Stop,
}

/// Result of one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// What the UI should render last: text not yet emitted, plus metadata.
    pub content: String,
    /// Assistant text already emitted as intermediate chunks, in order.
    pub intermediate: Vec<String>,
    /// Completion rounds executed.
    pub iterations: usize,
    /// `true` if the loop stopped on the round budget rather than a final answer.
    pub budget_exhausted: bool,
    pub elapsed: Duration,
    /// Usage summed over all rounds, when the endpoint reported it.
    pub usage: Option<TokenUsage>,
    /// The last reminder command issued during the turn.
    pub reminder: Option<ReminderCommand>,
}

impl TurnOutcome {
    /// The assistant's side of the turn as one text, for persistence.
    pub fn transcript_text(&self) -> String {
        if self.intermediate.is_empty() {
            self.content.clone()
        } else {
            self.intermediate.join("\n\n")
        }
    }
}
