//! In-memory tool server used by unit tests across the crate.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::McpError;
use super::transport::Transport;
use super::types::{JsonRpcRequest, JsonRpcResponse};

/// A scripted peer that answers MCP methods without any I/O.
pub struct FakeServer {
    tools: Vec<String>,
    replies: Mutex<HashMap<String, String>>,
    failing_methods: Mutex<HashSet<String>>,
    failing_tools: Mutex<HashMap<String, String>>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<JsonRpcRequest>>,
    notifications: Mutex<Vec<String>>,
    closes: Mutex<usize>,
}

impl FakeServer {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            replies: Mutex::new(HashMap::new()),
            failing_methods: Mutex::new(HashSet::new()),
            failing_tools: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            closes: Mutex::new(0),
        }
    }

    pub fn set_reply(&self, tool: &str, text: &str) {
        self.replies.lock().unwrap().insert(tool.into(), text.into());
    }

    pub fn fail_method(&self, method: &str) {
        self.failing_methods.lock().unwrap().insert(method.into());
    }

    pub fn fail_tool(&self, tool: &str, message: &str) {
        self.failing_tools.lock().unwrap().insert(tool.into(), message.into());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.method.clone()).collect()
    }

    pub fn request_ids(&self) -> Vec<u64> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.numeric_id())
            .collect()
    }

    pub fn last_params(&self, method: &str) -> Option<serde_json::Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == method)
            .and_then(|r| r.params.clone())
    }

    /// Arguments of every `tools/call`, in order, as `(tool, arguments)`.
    pub fn tool_calls(&self) -> Vec<(String, serde_json::Value)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == "tools/call")
            .filter_map(|r| r.params.clone())
            .map(|p| {
                (
                    p["name"].as_str().unwrap_or_default().to_string(),
                    p["arguments"].clone(),
                )
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }

    fn answer(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        if self.failing_methods.lock().unwrap().contains(&request.method) {
            return JsonRpcResponse::failure(id, -32603, format!("{} failed", request.method));
        }

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake-server", "version": "0.0.1"}
                }),
            ),
            "tools/list" => {
                let tools: Vec<_> = self
                    .tools
                    .iter()
                    .map(|name| {
                        serde_json::json!({
                            "name": name,
                            "description": format!("{name} tool"),
                            "inputSchema": {"type": "object", "properties": {}}
                        })
                    })
                    .collect();
                JsonRpcResponse::success(id, serde_json::json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = request.params.clone().unwrap_or_default();
                let name = params["name"].as_str().unwrap_or_default().to_string();
                if let Some(message) = self.failing_tools.lock().unwrap().get(&name) {
                    return JsonRpcResponse::failure(id, -32603, message.clone());
                }
                let text = self
                    .replies
                    .lock()
                    .unwrap()
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| format!("{name} ok"));
                JsonRpcResponse::success(
                    id,
                    serde_json::json!({"content": [{"type": "text", "text": text}]}),
                )
            }
            other => JsonRpcResponse::failure(id, -32601, format!("Method not found: {other}")),
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.answer(&request))
    }

    async fn send_notification(&self, notification: JsonRpcRequest) {
        self.notifications.lock().unwrap().push(notification.method);
    }

    async fn close(&self) {
        *self.closes.lock().unwrap() += 1;
    }
}
