//! Conversation orchestrator — the agentic tool-calling loop for one user turn.
//!
//! Each turn seeds a fresh [`Transcript`] with the system prompt, bounded
//! prior context and the user message, then alternates completion calls and
//! tool calls until the model answers without requesting tools or the round
//! budget runs out.
//!
//! Assistant text is emitted through [`TurnEvents::intermediate`] as soon as
//! it arrives, before its tool calls run, so the caller never waits for the
//! whole loop to see progress. The returned [`TurnOutcome::content`] omits
//! that text and carries only what is left: a notice (if any) and the timing
//! footer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::inference::types::{TokenUsage, ToolCall};
use crate::inference::{CompletionBackend, InferenceError};

use super::conversation::Transcript;
use super::errors::AgentError;
use super::tool_router::ToolProvider;
use super::types::{ConversationMessage, ReminderCommand, StoredMessage, TurnOutcome};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Completion rounds allowed per user turn.
pub const MAX_ITERATIONS: usize = 10;

/// Prior records replayed as context.
pub const DEFAULT_CONTEXT_MESSAGES: usize = 20;

/// Poll interval when a reminder start names none.
pub const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(40);

/// Tool whose start/stop actions drive the reminder poller.
pub const REMINDER_TOOL: &str = "reminder";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to tools \
for news search, current weather, and a recurring news reminder. Use a tool whenever it \
gives a better answer than your own knowledge, and answer in the user's language. When the \
user asks for periodic updates, call the reminder tool with action \"start\".";

/// Shown instead of a raw error dump for content-safety rejections.
pub const CONTENT_POLICY_APOLOGY: &str =
    "Sorry, I can't help with that request because it was flagged by the content safety filter.";

/// Prefix for user-visible failures.
pub const ERROR_PREFIX: &str = "⚠️ ";

// ─── Settings ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub system_prompt: String,
    pub max_iterations: usize,
    pub context_messages: usize,
    pub reminder_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: MAX_ITERATIONS,
            context_messages: DEFAULT_CONTEXT_MESSAGES,
            reminder_interval: DEFAULT_REMINDER_INTERVAL,
        }
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Side effects a turn produces while it runs.
pub trait TurnEvents: Send + Sync {
    /// Assistant text, emitted before the message's tool calls run.
    fn intermediate(&self, text: &str);

    /// A successful reminder start/stop tool call.
    fn reminder(&self, _command: ReminderCommand) {}
}

/// Discards every event.
pub struct NoEvents;

impl TurnEvents for NoEvents {
    fn intermediate(&self, _text: &str) {}
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    tools: Option<Arc<dyn ToolProvider>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        tools: Option<Arc<dyn ToolProvider>>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    pub fn tools(&self) -> Option<&Arc<dyn ToolProvider>> {
        self.tools.as_ref()
    }

    /// Run one user turn to completion.
    ///
    /// Fails only when a completion call fails; tool failures are fed back to
    /// the model as tool results.
    pub async fn run_turn(
        &self,
        history: &[StoredMessage],
        user_text: &str,
        events: &dyn TurnEvents,
    ) -> Result<TurnOutcome, AgentError> {
        let started = Instant::now();
        let mut transcript = Transcript::seed(&self.settings.system_prompt, history, user_text);
        let mut intermediate = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let mut reminder = None;
        let mut iterations = 0;
        let mut answered = false;

        while iterations < self.settings.max_iterations {
            iterations += 1;

            let tools = match &self.tools {
                Some(provider) => {
                    let defs = provider.list_tools_for_llm().await;
                    (!defs.is_empty()).then_some(defs)
                }
                None => None,
            };

            let completion = self
                .backend
                .complete(transcript.to_chat_messages(), tools)
                .await
                .inspect_err(|e| tracing::warn!(iteration = iterations, error = %e, "completion failed"))?;

            if let Some(round) = completion.usage {
                usage = Some(usage.map_or(round, |total: TokenUsage| total.add(round)));
            }

            if let Some(text) = completion
                .content
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
            {
                events.intermediate(text);
                intermediate.push(text.to_string());
            }

            let mut calls = completion.tool_calls;
            ensure_unique_call_ids(&mut calls);
            tracing::info!(
                iteration = iterations,
                tool_calls = calls.len(),
                "completion round finished"
            );

            transcript.push_assistant(ConversationMessage::Assistant {
                content: completion.content,
                tool_calls: calls.clone(),
            });

            if calls.is_empty() {
                answered = true;
                break;
            }

            // Sequential, in the order the model listed them.
            for call in &calls {
                let result = self.execute_tool_call(call, events, &mut reminder).await;
                transcript.push_tool_result(&call.id, result)?;
            }
        }

        let elapsed = started.elapsed();
        let notice = if intermediate.is_empty() {
            if answered {
                Some("The model returned an empty answer.".to_string())
            } else {
                Some(format!(
                    "Stopped after {iterations} tool rounds without a final answer."
                ))
            }
        } else {
            None
        };
        if !answered {
            tracing::warn!(iterations, "iteration budget exhausted");
        }

        let footer = format_footer(elapsed, usage);
        let content = match notice {
            Some(notice) => format!("{notice}\n\n{footer}"),
            None => footer,
        };

        Ok(TurnOutcome {
            content,
            intermediate,
            iterations,
            budget_exhausted: !answered,
            elapsed,
            usage,
            reminder,
        })
    }

    /// Call one tool and render its result (or failure) as tool-message text.
    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        events: &dyn TurnEvents,
        reminder: &mut Option<ReminderCommand>,
    ) -> String {
        let Some(provider) = &self.tools else {
            return format!("Error: no tools are available to run '{}'", call.name);
        };

        let started = Instant::now();
        match provider.call_tool(&call.name, &call.arguments).await {
            Ok(text) => {
                tracing::info!(
                    tool = %call.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool call succeeded"
                );
                if let Some(command) = reminder_command(call, self.settings.reminder_interval) {
                    events.reminder(command);
                    *reminder = Some(command);
                }
                text
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                format!("Error: {e}")
            }
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Give every repeated or empty call id in one assistant message a fresh id,
/// so each tool result pairs with exactly one call.
pub fn ensure_unique_call_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::with_capacity(calls.len());
    for call in calls.iter_mut() {
        if call.id.is_empty() || !seen.insert(call.id.clone()) {
            let fresh = format!("call_{}", Uuid::new_v4());
            tracing::debug!(tool = %call.name, old = %call.id, new = %fresh, "reassigned tool call id");
            call.id = fresh.clone();
            seen.insert(fresh);
        }
    }
}

/// Detect a reminder start/stop request from a call's parsed arguments.
///
/// Unparseable arguments never match.
pub fn reminder_command(call: &ToolCall, default_interval: Duration) -> Option<ReminderCommand> {
    if call.name != REMINDER_TOOL {
        return None;
    }
    let args: serde_json::Value = serde_json::from_str(&call.arguments).ok()?;
    let action = args.get("action")?.as_str()?.trim();

    if action.eq_ignore_ascii_case("start") {
        let interval = args
            .get("intervalSeconds")
            .or_else(|| args.get("interval_seconds"))
            .and_then(as_seconds)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(default_interval);
        Some(ReminderCommand::Start { interval })
    } else if action.eq_ignore_ascii_case("stop") {
        Some(ReminderCommand::Stop)
    } else {
        None
    }
}

fn as_seconds(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 1.0).map(|f| f as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Timing and token metadata appended to the end of a turn.
pub fn format_footer(elapsed: Duration, usage: Option<TokenUsage>) -> String {
    let secs = format!("⏱ {:.2}s", elapsed.as_secs_f64());
    match usage {
        Some(u) => format!("{secs} · 🔢 {} tokens", u.total_tokens),
        None => secs,
    }
}

/// The single message shown when a turn fails.
pub fn user_facing_error(err: &AgentError) -> String {
    match err {
        AgentError::Completion(e) if e.is_content_policy_rejection() => {
            CONTENT_POLICY_APOLOGY.to_string()
        }
        AgentError::Completion(InferenceError::HttpError { status, body }) => {
            format!("{ERROR_PREFIX}HTTP {status}: {body}")
        }
        other => format!("{ERROR_PREFIX}{other}"),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::agent_core::testing::{tool_call, RecordingTools, ScriptedBackend};
    use crate::inference::types::Role;

    #[derive(Default)]
    struct Captured {
        chunks: Mutex<Vec<String>>,
        reminders: Mutex<Vec<ReminderCommand>>,
    }

    impl TurnEvents for Captured {
        fn intermediate(&self, text: &str) {
            self.chunks.lock().unwrap().push(text.to_string());
        }

        fn reminder(&self, command: ReminderCommand) {
            self.reminders.lock().unwrap().push(command);
        }
    }

    fn orchestrator(backend: &Arc<ScriptedBackend>, tools: &Arc<RecordingTools>) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(backend) as Arc<dyn CompletionBackend>,
            Some(Arc::clone(tools) as Arc<dyn ToolProvider>),
            OrchestratorSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_plain_answer_single_round() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_text("Hello there");
        let tools = Arc::new(RecordingTools::new(&["search_news"]));
        let events = Captured::default();

        let outcome = orchestrator(&backend, &tools)
            .run_turn(&[], "hi", &events)
            .await
            .unwrap();

        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.budget_exhausted);
        assert_eq!(*events.chunks.lock().unwrap(), vec!["Hello there"]);
        assert!(!outcome.content.contains("Hello there"));
        assert!(outcome.content.starts_with("⏱ "));
        assert!(outcome.content.ends_with("🔢 10 tokens"));
        assert_eq!(outcome.transcript_text(), "Hello there");
    }

    #[tokio::test]
    async fn test_tools_offered_and_results_fed_back() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_calls(
            Some("Let me check."),
            vec![tool_call("call_1", "search_news", r#"{"q":"rust"}"#)],
        );
        backend.push_text("Rust is trending.");
        let tools = Arc::new(RecordingTools::new(&["search_news"]));
        tools.reply("search_news", "3 articles");
        let events = Captured::default();

        let outcome = orchestrator(&backend, &tools)
            .run_turn(&[], "news?", &events)
            .await
            .unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            *events.chunks.lock().unwrap(),
            vec!["Let me check.", "Rust is trending."]
        );
        assert_eq!(outcome.usage.map(|u| u.total_tokens), Some(20));
        assert_eq!(tools.calls(), vec![("search_news".into(), r#"{"q":"rust"}"#.into())]);

        let offered = backend.tools(0).unwrap();
        assert_eq!(offered[0].function.name, "search_news");

        let second = backend.messages(1);
        let tool_msg = second.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.content.as_deref(), Some("3 articles"));
    }

    #[tokio::test]
    async fn test_repeated_call_ids_both_answered() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_calls(
            None,
            vec![
                tool_call("call_0", "search_news", r#"{"q":"a"}"#),
                tool_call("call_0", "search_news", r#"{"q":"b"}"#),
            ],
        );
        backend.push_text("Both done.");
        let tools = Arc::new(RecordingTools::new(&["search_news"]));

        let outcome = orchestrator(&backend, &tools)
            .run_turn(&[], "two searches", &NoEvents)
            .await
            .unwrap();

        assert_eq!(tools.calls().len(), 2);
        assert_eq!(outcome.transcript_text(), "Both done.");

        let second = backend.messages(1);
        let assistant = &second[second.len() - 3];
        let ids: Vec<String> = assistant
            .tool_calls
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids[0], "call_0");
        assert_ne!(ids[0], ids[1]);
        let answered: Vec<Option<String>> = second[second.len() - 2..]
            .iter()
            .map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(answered, vec![Some(ids[0].clone()), Some(ids[1].clone())]);
    }

    #[test]
    fn test_ensure_unique_call_ids_fills_empty() {
        let mut calls = vec![tool_call("", "a", "{}"), tool_call("x", "b", "{}")];
        ensure_unique_call_ids(&mut calls);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[1].id, "x");
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_text() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_calls(None, vec![tool_call("c1", "missing_tool", "{}")]);
        backend.push_text("Sorry.");
        let tools = Arc::new(RecordingTools::new(&["search_news"]));

        orchestrator(&backend, &tools)
            .run_turn(&[], "x", &NoEvents)
            .await
            .unwrap();

        let tool_msg = backend.messages(1).last().cloned().unwrap();
        let text = tool_msg.content.unwrap();
        assert!(text.starts_with("Error: tool 'missing_tool' not found"));
        assert!(text.contains("search_news"));
    }

    #[tokio::test]
    async fn test_multiple_calls_run_in_order() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_calls(
            None,
            vec![
                tool_call("a", "search_news", "{}"),
                tool_call("b", "get_sources", "{}"),
                tool_call("c", "search_news", "{bad"),
            ],
        );
        let tools = Arc::new(RecordingTools::new(&["search_news", "get_sources"]));

        orchestrator(&backend, &tools)
            .run_turn(&[], "x", &NoEvents)
            .await
            .unwrap();

        let names: Vec<String> = tools.calls().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["search_news", "get_sources", "search_news"]);
        let ids: Vec<String> = backend
            .messages(1)
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_budget_exhausted_terminates() {
        let backend = Arc::new(ScriptedBackend::new());
        for i in 0..20 {
            backend.push_calls(None, vec![tool_call(&format!("c{i}"), "search_news", "{}")]);
        }
        let tools = Arc::new(RecordingTools::new(&["search_news"]));

        let outcome = orchestrator(&backend, &tools)
            .run_turn(&[], "loop forever", &NoEvents)
            .await
            .unwrap();

        assert_eq!(backend.call_count(), MAX_ITERATIONS);
        assert_eq!(outcome.iterations, MAX_ITERATIONS);
        assert!(outcome.budget_exhausted);
        assert!(outcome
            .content
            .starts_with("Stopped after 10 tool rounds without a final answer."));
    }

    #[tokio::test]
    async fn test_history_and_system_prompt_seeded() {
        let backend = Arc::new(ScriptedBackend::new());
        let tools = Arc::new(RecordingTools::new(&[]));
        let history = vec![
            StoredMessage::new(Role::User, "earlier question"),
            StoredMessage::new(Role::Assistant, "earlier answer"),
        ];

        orchestrator(&backend, &tools)
            .run_turn(&history, "follow-up", &NoEvents)
            .await
            .unwrap();

        let sent = backend.messages(0);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[1].content.as_deref(), Some("earlier question"));
        assert_eq!(sent[3].content.as_deref(), Some("follow-up"));
        // No tools listed means no tool schema sent.
        assert!(backend.tools(0).is_none());
    }

    #[tokio::test]
    async fn test_reminder_start_fires_only_on_success() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_calls(
            None,
            vec![tool_call("r1", "reminder", r#"{"action":"start","intervalSeconds":15}"#)],
        );
        backend.push_text("Started.");
        let tools = Arc::new(RecordingTools::new(&["reminder"]));
        let events = Captured::default();

        let outcome = orchestrator(&backend, &tools)
            .run_turn(&[], "remind me", &events)
            .await
            .unwrap();
        let expected = ReminderCommand::Start {
            interval: Duration::from_secs(15),
        };
        assert_eq!(*events.reminders.lock().unwrap(), vec![expected]);
        assert_eq!(outcome.reminder, Some(expected));

        let backend = Arc::new(ScriptedBackend::new());
        backend.push_calls(None, vec![tool_call("r2", "reminder", r#"{"action":"start"}"#)]);
        tools.fail("reminder", "upstream down");
        let events = Captured::default();
        let outcome = orchestrator(&backend, &tools)
            .run_turn(&[], "remind me", &events)
            .await
            .unwrap();
        assert!(events.reminders.lock().unwrap().is_empty());
        assert_eq!(outcome.reminder, None);
    }

    #[tokio::test]
    async fn test_completion_error_aborts_turn() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(Err(InferenceError::HttpError {
            status: 500,
            body: "upstream exploded".into(),
        }));
        let tools = Arc::new(RecordingTools::new(&[]));

        let err = orchestrator(&backend, &tools)
            .run_turn(&[], "x", &NoEvents)
            .await
            .unwrap_err();
        assert_eq!(user_facing_error(&err), "⚠️ HTTP 500: upstream exploded");
    }

    #[test]
    fn test_content_policy_gets_apology() {
        let err = AgentError::Completion(InferenceError::HttpError {
            status: 400,
            body: r#"{"error":{"message":"Content Exists Risk"}}"#.into(),
        });
        assert_eq!(user_facing_error(&err), CONTENT_POLICY_APOLOGY);

        let generic = AgentError::Completion(InferenceError::HttpError {
            status: 400,
            body: "bad request".into(),
        });
        assert_eq!(user_facing_error(&generic), "⚠️ HTTP 400: bad request");
    }

    #[test]
    fn test_reminder_command_detection() {
        let default = Duration::from_secs(40);
        let detect = |name: &str, args: &str| reminder_command(&tool_call("x", name, args), default);

        assert_eq!(
            detect("reminder", r#"{"action":"start"}"#),
            Some(ReminderCommand::Start { interval: default })
        );
        assert_eq!(
            detect("reminder", r#"{"action":"START","interval_seconds":"5"}"#),
            Some(ReminderCommand::Start {
                interval: Duration::from_secs(5)
            })
        );
        assert_eq!(detect("reminder", r#"{"action":"stop"}"#), Some(ReminderCommand::Stop));
        assert_eq!(detect("reminder", r#"{"action":"get"}"#), None);
        // A "start" substring elsewhere must not match.
        assert_eq!(detect("reminder", r#"{"action":"get","note":"start"}"#), None);
        assert_eq!(detect("reminder", r#"{"action":"start""#), None);
        assert_eq!(detect("search_news", r#"{"action":"start"}"#), None);
    }

    #[test]
    fn test_footer_formats() {
        assert_eq!(format_footer(Duration::from_millis(1500), None), "⏱ 1.50s");
        let usage = TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        };
        assert_eq!(
            format_footer(Duration::from_millis(250), Some(usage)),
            "⏱ 0.25s · 🔢 3 tokens"
        );
    }
}
