//! ChatSession — the surface a UI talks to.
//!
//! Owns the orchestrator, the message store, the reminder poller, and the
//! event channel. Turns are serialized; the poller runs beside them for the
//! session's whole lifetime and is cancelled when the session shuts down or
//! is dropped.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::inference::types::Role;
use crate::inference::CompletionBackend;

use super::conversation::SideTranscript;
use super::errors::AgentError;
use super::orchestrator::{user_facing_error, Orchestrator, OrchestratorSettings, TurnEvents};
use super::reminder::ReminderPoller;
use super::store::MessageStore;
use super::tool_router::ToolProvider;
use super::types::{ChatEvent, ReminderCommand, StoredMessage};

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

pub struct ChatSession {
    orchestrator: Orchestrator,
    tools: Option<Arc<dyn ToolProvider>>,
    store: Arc<dyn MessageStore>,
    poller: Option<ReminderPoller>,
    side: SideTranscript,
    events: broadcast::Sender<ChatEvent>,
    turn_lock: Mutex<()>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        tools: Option<Arc<dyn ToolProvider>>,
        store: Arc<dyn MessageStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let side = SideTranscript::new();
        let poller = tools.as_ref().map(|tools| {
            ReminderPoller::new(
                Arc::clone(tools),
                Arc::clone(&backend),
                side.clone(),
                events.clone(),
            )
        });

        Self {
            orchestrator: Orchestrator::new(backend, tools.clone(), settings),
            tools,
            store,
            poller,
            side,
            events,
            turn_lock: Mutex::new(()),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Run one turn for `text`.
    ///
    /// Returns the closing event (`Final` or `Error`), which is also
    /// published. Blank input is ignored and returns `None`.
    pub async fn send_message(&self, text: &str) -> Option<ChatEvent> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let _turn = self.turn_lock.lock().await;

        let context = self.orchestrator.settings().context_messages;
        let history = self.store.get_recent(context).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not load history, continuing without it");
            Vec::new()
        });
        self.persist(StoredMessage::new(Role::User, text));

        let sink = SessionEvents {
            events: &self.events,
            poller: self.poller.as_ref(),
        };
        let event = match self.orchestrator.run_turn(&history, text, &sink).await {
            Ok(outcome) => {
                self.persist(StoredMessage::new(Role::Assistant, outcome.transcript_text()));
                tracing::info!(
                    iterations = outcome.iterations,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "turn complete"
                );
                ChatEvent::Final(outcome.content)
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                ChatEvent::Error(user_facing_error(&e))
            }
        };

        let _ = self.events.send(event.clone());
        Some(event)
    }

    fn persist(&self, message: StoredMessage) {
        if let Err(e) = self.store.append(message) {
            tracing::warn!(error = %e, "failed to persist message");
        }
    }

    /// `true` when the tool backends are reachable (or none are configured).
    pub fn is_ready(&self) -> bool {
        self.tools.as_ref().map_or(true, |t| t.is_ready())
    }

    pub fn reminder_active(&self) -> bool {
        self.poller.as_ref().is_some_and(ReminderPoller::is_active)
    }

    /// Persisted conversation, oldest first.
    pub fn history(&self) -> Result<Vec<StoredMessage>, AgentError> {
        self.store.get_all()
    }

    /// Reminder summaries, oldest first.
    pub fn side_transcript(&self) -> Vec<StoredMessage> {
        self.side.snapshot()
    }

    /// Empty the conversation and the side transcript.
    ///
    /// Waits for a running turn to finish first.
    pub async fn clear(&self) -> Result<(), AgentError> {
        let _turn = self.turn_lock.lock().await;
        self.store.clear()?;
        self.side.clear();
        tracing::info!("conversation cleared");
        Ok(())
    }

    /// Stop the poller and release every tool backend.
    pub async fn shutdown(&self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        if let Some(tools) = &self.tools {
            tools.close().await;
        }
    }
}

/// Routes turn events to subscribers and reminder commands to the poller.
struct SessionEvents<'a> {
    events: &'a broadcast::Sender<ChatEvent>,
    poller: Option<&'a ReminderPoller>,
}

impl TurnEvents for SessionEvents<'_> {
    fn intermediate(&self, text: &str) {
        let _ = self.events.send(ChatEvent::Intermediate(text.to_string()));
    }

    fn reminder(&self, command: ReminderCommand) {
        let Some(poller) = self.poller else {
            return;
        };
        match command {
            ReminderCommand::Start { interval } => {
                poller.start(interval);
            }
            ReminderCommand::Stop => poller.stop(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
