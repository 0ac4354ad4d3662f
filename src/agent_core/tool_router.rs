//! ToolRouter — presents every configured tool server as one tool space.
//!
//! The router owns the protocol clients and a registry rebuilt from their
//! catalogs on each `list_tools_for_llm()`. The orchestrator and the reminder
//! poller only see the [`ToolProvider`] trait.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::inference::types::ToolDefinition;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::ServersConfig;
use crate::mcp_client::{ClientState, McpClient, ToolRegistry};

// ─── ToolProvider ───────────────────────────────────────────────────────────

/// The tool surface the orchestrator and poller depend on.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// The current catalog in the LLM function-calling schema.
    ///
    /// Never fails: unavailable servers simply contribute no tools.
    async fn list_tools_for_llm(&self) -> Vec<ToolDefinition>;

    /// Call a tool with the model's raw argument text.
    async fn call_tool(&self, name: &str, arguments_json: &str) -> Result<String, McpError>;

    /// `true` when at least one backend is connected.
    fn is_ready(&self) -> bool {
        true
    }

    /// Release every backend.
    async fn close(&self) {}
}

// ─── ToolRouter ─────────────────────────────────────────────────────────────

pub struct ToolRouter {
    clients: Vec<Arc<McpClient>>,
    /// Swapped whole on rebuild; readers may briefly see the previous generation.
    registry: RwLock<Arc<ToolRegistry>>,
}

impl ToolRouter {
    pub fn new(clients: Vec<Arc<McpClient>>) -> Self {
        Self {
            clients,
            registry: RwLock::new(Arc::new(ToolRegistry::new())),
        }
    }

    /// One lazily-connecting client per configured server, in name order.
    pub fn from_config(servers: &ServersConfig, call_timeout: Duration) -> Self {
        let clients = servers
            .iter()
            .map(|(name, config)| {
                Arc::new(McpClient::new(name, config.clone()).with_call_timeout(call_timeout))
            })
            .collect();
        Self::new(clients)
    }

    pub fn clients(&self) -> &[Arc<McpClient>] {
        &self.clients
    }

    /// Initialize every client concurrently.
    ///
    /// Returns the names of servers that connected. Failures are logged and
    /// left for the next `list_tools_for_llm()` to retry.
    pub async fn connect_all(&self) -> Vec<String> {
        let results = join_all(self.clients.iter().map(|c| c.initialize())).await;
        let mut connected = Vec::new();
        for (client, result) in self.clients.iter().zip(results) {
            match result {
                Ok(()) => connected.push(client.name().to_string()),
                Err(e) => {
                    tracing::warn!(server = %client.name(), error = %e, "tool server unavailable");
                }
            }
        }
        tracing::info!(
            connected = connected.len(),
            configured = self.clients.len(),
            "tool servers connected"
        );
        connected
    }

    /// The registry from the last rebuild.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry
            .read()
            .map(|r| Arc::clone(&r))
            .unwrap_or_else(|_| Arc::new(ToolRegistry::new()))
    }

    /// Query every client and swap in a freshly built registry.
    pub async fn rebuild_registry(&self) -> Arc<ToolRegistry> {
        let listings = join_all(self.clients.iter().map(|c| c.list_tools())).await;

        let mut registry = ToolRegistry::new();
        for (client, listing) in self.clients.iter().zip(listings) {
            match listing {
                Ok(tools) => registry.register_server_tools(client, tools),
                Err(e) => {
                    tracing::warn!(server = %client.name(), error = %e, "tools/list failed, skipping server");
                }
            }
        }

        let registry = Arc::new(registry);
        if let Ok(mut slot) = self.registry.write() {
            *slot = Arc::clone(&registry);
        }
        tracing::debug!(tools = registry.len(), "tool registry rebuilt");
        registry
    }

    pub async fn close_all(&self) {
        join_all(self.clients.iter().map(|c| c.close())).await;
    }
}

#[async_trait]
impl ToolProvider for ToolRouter {
    async fn list_tools_for_llm(&self) -> Vec<ToolDefinition> {
        self.rebuild_registry().await.to_openai_tools()
    }

    async fn call_tool(&self, name: &str, arguments_json: &str) -> Result<String, McpError> {
        let registry = self.registry();
        let tool = registry.get(name).ok_or_else(|| McpError::ToolNotFound {
            name: name.to_string(),
            available: registry.tool_names(),
        })?;

        let arguments = parse_arguments(name, arguments_json);
        tracing::info!(tool = name, server = %tool.server(), "routing tool call");
        tool.client.call_tool(name, arguments).await
    }

    fn is_ready(&self) -> bool {
        self.clients
            .iter()
            .any(|c| c.state() == ClientState::Ready)
    }

    async fn close(&self) {
        self.close_all().await;
    }
}

/// Parse model-produced argument text into a JSON object.
///
/// Malformed text and non-object values degrade to `{}`.
pub fn parse_arguments(tool: &str, arguments_json: &str) -> serde_json::Value {
    if arguments_json.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(arguments_json) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(tool, kind = %json_kind(&other), "tool arguments are not an object, using {{}}");
            serde_json::json!({})
        }
        Err(e) => {
            tracing::warn!(tool, error = %e, "unparseable tool arguments, using {{}}");
            serde_json::json!({})
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
