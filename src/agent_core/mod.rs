//! Agent core — the conversation side of the tool-calling loop.
//!
//! This module handles:
//! - Routing model tool calls to the configured tool servers
//! - The per-turn completion/tool loop with a bounded round budget
//! - The background reminder poller and its side transcript
//! - Message persistence (in memory or SQLite)
//! - The chat session surface consumed by a UI

pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod reminder;
pub mod session;
pub mod store;
pub mod tool_router;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::AgentError;
pub use orchestrator::{Orchestrator, OrchestratorSettings, TurnEvents};
pub use reminder::ReminderPoller;
pub use session::ChatSession;
pub use store::{InMemoryStore, MessageStore, SqliteStore};
pub use tool_router::{ToolProvider, ToolRouter};
pub use types::{ChatEvent, ReminderCommand, StoredMessage, TurnOutcome};
