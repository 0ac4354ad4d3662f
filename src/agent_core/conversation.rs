//! Transcripts — the per-turn working context and the reminder side stream.
//!
//! A [`Transcript`] is owned by the orchestrator for the length of one turn
//! and enforces the tool-result pairing rule: a tool message may only answer
//! a call of the closest preceding assistant message, and only once.
//!
//! The [`SideTranscript`] is shared with the reminder poller, which is its
//! only writer. Keeping the two apart means a tick can never interleave with
//! a turn in progress.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::inference::types::{ChatMessage, Role};

use super::errors::AgentError;
use super::types::{ConversationMessage, StoredMessage};

// ─── Transcript ─────────────────────────────────────────────────────────────

/// Ordered messages for one turn.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ConversationMessage>,
    /// Call ids of the last assistant message not yet answered.
    pending: HashSet<String>,
}

impl Transcript {
    /// Seed a transcript with the system prompt, prior context, and the new user message.
    pub fn seed(system_prompt: &str, history: &[StoredMessage], user_text: &str) -> Self {
        let mut transcript = Self::default();
        transcript.messages.push(ConversationMessage::System {
            content: system_prompt.to_string(),
        });
        for record in history {
            match record.role {
                Role::User => transcript.push_user(&record.content),
                Role::Assistant => transcript.messages.push(ConversationMessage::Assistant {
                    content: Some(record.content.clone()),
                    tool_calls: Vec::new(),
                }),
                // Only user and final assistant records are persisted.
                Role::System | Role::Tool => {}
            }
        }
        transcript.push_user(user_text);
        transcript
    }

    fn push_user(&mut self, text: &str) {
        self.pending.clear();
        self.messages.push(ConversationMessage::User {
            content: text.to_string(),
        });
    }

    /// Append an assistant message. Its tool calls become the pending set.
    pub fn push_assistant(&mut self, message: ConversationMessage) {
        self.pending = match &message {
            ConversationMessage::Assistant { tool_calls, .. } => {
                tool_calls.iter().map(|c| c.id.clone()).collect()
            }
            _ => HashSet::new(),
        };
        self.messages.push(message);
    }

    /// Append a tool result for a pending call.
    pub fn push_tool_result(
        &mut self,
        tool_call_id: &str,
        content: impl Into<String>,
    ) -> Result<(), AgentError> {
        if !self.pending.remove(tool_call_id) {
            return Err(AgentError::UnmatchedToolResult {
                tool_call_id: tool_call_id.to_string(),
            });
        }
        self.messages.push(ConversationMessage::Tool {
            tool_call_id: tool_call_id.to_string(),
            content: content.into(),
        });
        Ok(())
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render for the completion endpoint.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(ConversationMessage::to_chat_message)
            .collect()
    }
}

// ─── SideTranscript ─────────────────────────────────────────────────────────

/// Reminder summaries, appended by the poller and read by the UI.
#[derive(Debug, Clone, Default)]
pub struct SideTranscript {
    entries: Arc<Mutex<Vec<StoredMessage>>>,
}

impl SideTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, text: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(StoredMessage::new(Role::Assistant, text));
        }
    }

    /// A copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::ToolCall;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "search_news".to_string(),
            arguments: "{}".to_string(),
        }
    }

    fn assistant_with(ids: &[&str]) -> ConversationMessage {
        ConversationMessage::Assistant {
            content: None,
            tool_calls: ids.iter().map(|id| call(id)).collect(),
        }
    }

    #[test]
    fn test_seed_orders_system_history_user() {
        let history = vec![
            StoredMessage::new(Role::User, "earlier"),
            StoredMessage::new(Role::Assistant, "answer"),
        ];
        let t = Transcript::seed("be helpful", &history, "now");
        let roles: Vec<Role> = t.messages().iter().map(|m| m.role()).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(
            t.messages().last(),
            Some(&ConversationMessage::User {
                content: "now".into()
            })
        );
    }

    #[test]
    fn test_tool_result_must_match_pending_call() {
        let mut t = Transcript::seed("sys", &[], "hi");
        t.push_assistant(assistant_with(&["call_a", "call_b"]));

        assert!(t.push_tool_result("call_b", "b").is_ok());
        assert!(t.push_tool_result("call_a", "a").is_ok());
        let err = t.push_tool_result("call_a", "again").unwrap_err();
        assert!(matches!(err, AgentError::UnmatchedToolResult { .. }));
        assert!(t.push_tool_result("call_z", "z").is_err());
    }

    #[test]
    fn test_new_assistant_message_resets_pending() {
        let mut t = Transcript::seed("sys", &[], "hi");
        t.push_assistant(assistant_with(&["call_a"]));
        t.push_assistant(assistant_with(&["call_b"]));
        assert!(t.push_tool_result("call_a", "stale").is_err());
        assert!(t.push_tool_result("call_b", "ok").is_ok());
    }

    #[test]
    fn test_every_tool_message_follows_its_call() {
        let mut t = Transcript::seed("sys", &[], "hi");
        t.push_assistant(assistant_with(&["c1"]));
        t.push_tool_result("c1", "r1").unwrap();
        t.push_assistant(assistant_with(&["c2", "c3"]));
        t.push_tool_result("c2", "r2").unwrap();
        t.push_tool_result("c3", "r3").unwrap();

        let mut last_ids: Vec<String> = Vec::new();
        for msg in t.messages() {
            match msg {
                ConversationMessage::Assistant { tool_calls, .. } => {
                    last_ids = tool_calls.iter().map(|c| c.id.clone()).collect();
                }
                ConversationMessage::Tool { tool_call_id, .. } => {
                    assert!(last_ids.contains(tool_call_id));
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_side_transcript_shared_between_clones() {
        let side = SideTranscript::new();
        let writer = side.clone();
        writer.append("🔔 news");
        assert_eq!(side.len(), 1);
        assert_eq!(side.snapshot()[0].content, "🔔 news");
        side.clear();
        assert!(writer.is_empty());
    }
}
