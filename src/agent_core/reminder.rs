//! Reminder poller — periodic re-query of the `reminder` tool.
//!
//! State machine: `Idle → Active → Idle`. `start()` spawns one ticking task;
//! each tick calls `reminder` with `{"action":"get"}`, skips "no data yet"
//! replies, and has the LLM summarize anything new into the side transcript.
//!
//! A failing tick publishes a warning and the schedule continues, unless the
//! failure says the upstream reminder stopped; then the task ends itself and
//! the poller is `Idle` again.
//!
//! The poller writes only the [`SideTranscript`], never a turn's transcript.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::inference::types::ChatMessage;
use crate::inference::CompletionBackend;

use super::conversation::SideTranscript;
use super::orchestrator::{CONTENT_POLICY_APOLOGY, ERROR_PREFIX, REMINDER_TOOL};
use super::tool_router::ToolProvider;
use super::types::ChatEvent;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Tool text longer than this is cut before summarization.
pub const MAX_SUMMARY_INPUT_CHARS: usize = 3000;

const GET_ARGUMENTS: &str = r#"{"action":"get"}"#;

const SUMMARY_PROMPT: &str = "You receive a periodic news snapshot as JSON. Summarize the \
most important headlines in a few short bullet points, naming the countries covered. If a \
previousContext is present, say briefly what changed since then. Do not mention JSON.";

// ─── ReminderPoller ─────────────────────────────────────────────────────────

pub struct ReminderPoller {
    context: Arc<TickContext>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Everything a tick needs, shared with the spawned task.
struct TickContext {
    tools: Arc<dyn ToolProvider>,
    backend: Arc<dyn CompletionBackend>,
    side: SideTranscript,
    events: broadcast::Sender<ChatEvent>,
    ticks: AtomicU64,
}

/// Whether the schedule continues after a tick.
#[derive(Debug, PartialEq, Eq)]
enum TickFlow {
    Continue,
    Stop,
}

impl ReminderPoller {
    pub fn new(
        tools: Arc<dyn ToolProvider>,
        backend: Arc<dyn CompletionBackend>,
        side: SideTranscript,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            context: Arc::new(TickContext {
                tools,
                backend,
                side,
                events,
                ticks: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Begin polling every `interval`, first tick one interval from now.
    ///
    /// Returns `false` (and changes nothing) if already active.
    pub fn start(&self, interval: Duration) -> bool {
        let Ok(mut slot) = self.task.lock() else {
            return false;
        };
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("reminder poller already active, start ignored");
            return false;
        }

        let interval = interval.max(Duration::from_secs(1));
        let context = Arc::clone(&self.context);
        *slot = Some(tokio::spawn(run_schedule(context, interval)));
        tracing::info!(interval_secs = interval.as_secs(), "reminder poller started");
        true
    }

    /// Cancel the schedule. Idempotent.
    pub fn stop(&self) {
        let handle = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if !handle.is_finished() {
                tracing::info!("reminder poller stopped");
            }
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Ticks completed since construction.
    pub fn ticks(&self) -> u64 {
        self.context.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for ReminderPoller {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

// ─── Schedule ───────────────────────────────────────────────────────────────

async fn run_schedule(context: Arc<TickContext>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_text: Option<String> = None;

    loop {
        ticker.tick().await;
        let flow = context.tick(&mut last_text).await;
        context.ticks.fetch_add(1, Ordering::Relaxed);
        if flow == TickFlow::Stop {
            tracing::info!("upstream reminder stopped, poller idle");
            break;
        }
    }
}

impl TickContext {
    async fn tick(&self, last_text: &mut Option<String>) -> TickFlow {
        let text = match self.tools.call_tool(REMINDER_TOOL, GET_ARGUMENTS).await {
            Ok(text) => text,
            Err(e) => {
                let message = e.to_string();
                self.warn(&message);
                return if is_stopped(&message) {
                    TickFlow::Stop
                } else {
                    TickFlow::Continue
                };
            }
        };

        if is_no_data(&text) {
            tracing::debug!("reminder has no data yet, skipping tick");
            return TickFlow::Continue;
        }
        if last_text.as_deref() == Some(text.as_str()) {
            tracing::debug!("reminder data unchanged, skipping tick");
            return TickFlow::Continue;
        }

        let input = truncate_for_summary(&text, MAX_SUMMARY_INPUT_CHARS);
        let messages = vec![ChatMessage::system(SUMMARY_PROMPT), ChatMessage::user(input)];
        match self.backend.complete(messages, None).await {
            Ok(completion) => {
                let summary = completion.content.unwrap_or_default();
                let summary = summary.trim();
                if summary.is_empty() {
                    self.warn("summary was empty");
                } else {
                    let entry = format!("🔔 {summary}");
                    self.side.append(entry.clone());
                    let _ = self.events.send(ChatEvent::Reminder(entry));
                    tracing::info!(chars = text.chars().count(), "reminder summary published");
                }
                *last_text = Some(text);
            }
            Err(e) if e.is_content_policy_rejection() => self.warn(CONTENT_POLICY_APOLOGY),
            Err(e) => self.warn(&format!("summarization failed: {e}")),
        }
        TickFlow::Continue
    }

    fn warn(&self, message: &str) {
        tracing::warn!(error = message, "reminder tick failed");
        let _ = self
            .events
            .send(ChatEvent::Warning(format!("{ERROR_PREFIX}Reminder: {message}")));
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn is_no_data(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.to_lowercase().starts_with("no reminder data")
}

fn is_stopped(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("not running") || text.contains("stopped")
}

/// Cut `text` to `max_chars` characters, noting the original length.
pub fn truncate_for_summary(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}\n\n[... truncated: showing first {max_chars} of {total} chars]")
}

// ─── Tests ──────────────────────────────────────────────────────────────────
