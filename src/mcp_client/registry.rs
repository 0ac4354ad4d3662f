//! Tool registry — one namespace over many tool servers.
//!
//! Built from the catalogs returned by each client's `tools/list`, in client
//! order. Tool names stay bare (the model and the reminder poller address
//! tools like `reminder` directly), so a name declared by two servers is
//! resolved by rejecting the later registration.
//!
//! A registry is immutable once built; the router swaps whole registries.

use std::collections::HashMap;
use std::sync::Arc;

use super::client::McpClient;
use super::types::McpToolDefinition;
use crate::inference::types::{FunctionDefinition, ToolDefinition};

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// A tool together with the client that serves it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: McpToolDefinition,
    pub client: Arc<McpClient>,
}

impl RegisteredTool {
    /// Name of the server that owns this tool.
    pub fn server(&self) -> &str {
        self.client.name()
    }
}

/// A tool name that lost to an earlier registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTool {
    pub name: String,
    pub kept_server: String,
    pub rejected_server: String,
}

/// Ordered name → client map.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
    duplicates: Vec<DuplicateTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool a client listed.
    ///
    /// First registration wins. Later duplicates are recorded, logged, and
    /// left out of the registry.
    pub fn register_server_tools(&mut self, client: &Arc<McpClient>, tools: Vec<McpToolDefinition>) {
        for definition in tools {
            if let Some(&existing) = self.by_name.get(&definition.name) {
                let duplicate = DuplicateTool {
                    name: definition.name.clone(),
                    kept_server: self.tools[existing].server().to_string(),
                    rejected_server: client.name().to_string(),
                };
                tracing::warn!(
                    tool = %duplicate.name,
                    kept = %duplicate.kept_server,
                    rejected = %duplicate.rejected_server,
                    "duplicate tool name rejected"
                );
                self.duplicates.push(duplicate);
                continue;
            }

            self.by_name.insert(definition.name.clone(), self.tools.len());
            self.tools.push(RegisteredTool {
                definition,
                client: Arc::clone(client),
            });
        }
    }

    /// Look up a tool by exact name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Name of the server that owns `tool_name`.
    pub fn get_server_for_tool(&self, tool_name: &str) -> Option<&str> {
        self.get(tool_name).map(RegisteredTool::server)
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tools in registration order.
    pub fn tools(&self) -> &[RegisteredTool] {
        &self.tools
    }

    /// Registrations rejected as duplicates during the build.
    pub fn duplicates(&self) -> &[DuplicateTool] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the catalog in the LLM function-calling schema, in registration order.
    pub fn to_openai_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.definition.name.clone(),
                    description: tool.definition.description.clone().unwrap_or_default(),
                    parameters: tool.definition.input_schema.clone(),
                },
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
