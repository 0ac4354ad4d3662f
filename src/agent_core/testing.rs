//! Scripted collaborators for agent core tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::tool_router::ToolProvider;
use crate::inference::types::{
    ChatMessage, Completion, FunctionDefinition, TokenUsage, ToolCall, ToolDefinition,
};
use crate::inference::{CompletionBackend, InferenceError};
use crate::mcp_client::McpError;

// ─── Completions ────────────────────────────────────────────────────────────

/// Answers completion calls from a queue; an empty queue answers "done".
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<Completion, InferenceError>>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Option<Vec<ToolDefinition>>)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Result<Completion, InferenceError>) -> &Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.push(Ok(text_completion(text)))
    }

    pub fn push_calls(&self, text: Option<&str>, calls: Vec<ToolCall>) -> &Self {
        self.push(Ok(Completion {
            content: text.map(str::to_string),
            tool_calls: calls,
            usage: Some(usage(10)),
        }))
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Messages sent on the `n`th completion call.
    pub fn messages(&self, n: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[n].0.clone()
    }

    pub fn tools(&self, n: usize) -> Option<Vec<ToolDefinition>> {
        self.requests.lock().unwrap()[n].1.clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        self.requests.lock().unwrap().push((messages, tools));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text_completion("done")))
    }
}

pub fn text_completion(text: &str) -> Completion {
    Completion {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
        usage: Some(usage(10)),
    }
}

pub fn usage(total: u32) -> TokenUsage {
    TokenUsage {
        prompt_tokens: total / 2,
        completion_tokens: total - total / 2,
        total_tokens: total,
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

// ─── Tools ──────────────────────────────────────────────────────────────────

/// Records every call; answers from one-shot queues, then fixed replies.
pub struct RecordingTools {
    names: Vec<String>,
    fixed: Mutex<HashMap<String, Result<String, String>>>,
    queued: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
    calls: Mutex<Vec<(String, String)>>,
    ready: bool,
}

impl RecordingTools {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            fixed: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            ready: true,
        }
    }

    pub fn reply(&self, tool: &str, text: &str) {
        self.fixed.lock().unwrap().insert(tool.into(), Ok(text.into()));
    }

    pub fn fail(&self, tool: &str, message: &str) {
        self.fixed.lock().unwrap().insert(tool.into(), Err(message.into()));
    }

    pub fn queue(&self, tool: &str, reply: Result<&str, &str>) {
        self.queued
            .lock()
            .unwrap()
            .entry(tool.into())
            .or_default()
            .push_back(reply.map(str::to_string).map_err(str::to_string));
    }

    /// `(tool, raw arguments)` in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolProvider for RecordingTools {
    async fn list_tools_for_llm(&self) -> Vec<ToolDefinition> {
        self.names
            .iter()
            .map(|name| ToolDefinition {
                r#type: "function".into(),
                function: FunctionDefinition {
                    name: name.clone(),
                    description: format!("{name} tool"),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments_json: &str) -> Result<String, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments_json.to_string()));

        if !self.names.iter().any(|n| n == name) {
            return Err(McpError::ToolNotFound {
                name: name.to_string(),
                available: self.names.clone(),
            });
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|q| q.pop_front());
        let reply = queued.or_else(|| self.fixed.lock().unwrap().get(name).cloned());
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(McpError::ProtocolError {
                code: -32603,
                message,
                data: None,
            }),
            None => Ok(format!("{name} ok")),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}
