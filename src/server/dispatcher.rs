//! JSON-RPC dispatcher for the tool server.
//!
//! Stateless over requests: each message is answered on its own, and no
//! handler failure (including a panic) escapes as anything but a well-formed
//! error reply.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::mcp_client::types::{
    error_codes, JsonRpcRequest, JsonRpcResponse, McpToolDefinition, PROTOCOL_VERSION,
};

/// Arguments of a `tools/call`, always a JSON object.
pub type Arguments = Map<String, Value>;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Failures a tool handler reports to the caller.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required argument: {name}")]
    MissingArgument { name: String },

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// The backing service failed or refused the request.
    #[error("{reason}")]
    Upstream { reason: String },
}

impl ToolError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            ToolError::MissingArgument { .. }
            | ToolError::InvalidArgument { .. }
            | ToolError::UnknownTool { .. } => error_codes::INVALID_PARAMS,
            ToolError::Upstream { .. } => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        ToolError::Upstream {
            reason: reason.into(),
        }
    }
}

// ─── ToolHandler ────────────────────────────────────────────────────────────

/// One tool hosted by the server.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and input schema advertised in `tools/list`.
    fn descriptor(&self) -> McpToolDefinition;

    /// Run the tool. Required arguments are already checked.
    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError>;
}

// ─── Dispatcher ─────────────────────────────────────────────────────────────

pub struct Dispatcher {
    name: String,
    version: String,
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            handlers: BTreeMap::new(),
        }
    }

    /// Add a tool. A later handler with the same name replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.descriptor().name;
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "tool handler replaced");
        }
    }

    pub fn with_tools(mut self, handlers: impl IntoIterator<Item = Arc<dyn ToolHandler>>) -> Self {
        for handler in handlers {
            self.register(handler);
        }
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Answer one message. Notifications get no reply.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }

        let id = request.id.clone();
        let reply = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params.as_ref()).await,
            other => Err((
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        Some(match reply {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => {
                tracing::warn!(method = %request.method, code, error = %message, "request failed");
                JsonRpcResponse::failure(id, code, message)
            }
        })
    }

    /// Answer one newline-delimited message. Unparseable input gets a
    /// parse-error reply with a null id.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle(request).await?,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                JsonRpcResponse::failure(
                    Some(Value::Null),
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                )
            }
        };
        serialize_response(&response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": self.name, "version": self.version }
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<McpToolDefinition> =
            self.handlers.values().map(|h| h.descriptor()).collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, (i32, String)> {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or((
                error_codes::INVALID_PARAMS,
                "Missing tool name".to_string(),
            ))?;
        let arguments = match params.and_then(|p| p.get("arguments")) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err((
                    error_codes::INVALID_PARAMS,
                    "Tool arguments must be an object".to_string(),
                ))
            }
        };

        let handler = self.handlers.get(name).ok_or_else(|| {
            let err = ToolError::UnknownTool {
                name: name.to_string(),
            };
            (err.code(), err.to_string())
        })?;

        check_required(&handler.descriptor(), &arguments).map_err(|e| (e.code(), e.to_string()))?;

        tracing::info!(tool = name, "tool call");
        match AssertUnwindSafe(handler.call(&arguments)).catch_unwind().await {
            Ok(Ok(text)) => Ok(json!({
                "content": [{ "type": "text", "text": text }]
            })),
            Ok(Err(e)) => Err((e.code(), e.to_string())),
            Err(_) => {
                tracing::error!(tool = name, "tool handler panicked");
                Err((error_codes::INTERNAL_ERROR, "Internal error".to_string()))
            }
        }
    }
}

/// Every name in `inputSchema.required` must be present and non-null.
fn check_required(descriptor: &McpToolDefinition, arguments: &Arguments) -> Result<(), ToolError> {
    for name in descriptor.required_params() {
        match arguments.get(name) {
            None | Some(Value::Null) => {
                return Err(ToolError::MissingArgument {
                    name: name.to_string(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn serialize_response(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            None
        }
    }
}

// ─── Argument Helpers ───────────────────────────────────────────────────────

/// Optional string argument; blank strings count as absent.
pub fn opt_str<'a>(arguments: &'a Arguments, name: &str) -> Option<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Required string argument.
pub fn req_str<'a>(arguments: &'a Arguments, name: &str) -> Result<&'a str, ToolError> {
    match arguments.get(name) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument {
            name: name.to_string(),
        }),
        Some(_) => opt_str(arguments, name).ok_or_else(|| ToolError::InvalidArgument {
            name: name.to_string(),
            reason: "expected a non-empty string".into(),
        }),
    }
}

/// Numeric argument given as a number or a numeric string.
pub fn opt_f64(arguments: &Arguments, name: &str) -> Result<Option<f64>, ToolError> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| ToolError::InvalidArgument {
            name: name.to_string(),
            reason: format!("'{s}' is not a number"),
        }),
        Some(other) => Err(ToolError::InvalidArgument {
            name: name.to_string(),
            reason: format!("expected a number, got {other}"),
        }),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
