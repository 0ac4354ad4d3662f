//! Protocol client for one tool server.
//!
//! Owns a single [`Transport`] and drives the MCP conversation over it:
//! the `initialize`/`initialized` handshake, `tools/list`, and `tools/call`.
//! Request ids come from a per-client counter, so independent clients never
//! share id space.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::errors::McpError;
use super::http::HttpTransport;
use super::transport::{extract_result, StdioTransport, Transport};
use super::types::{
    InitializeResult, JsonRpcRequest, McpToolDefinition, ServerConfig, ServerInfo,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the `initialize` request.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for `tools/list` and `tools/call`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Client name announced in `initialize`.
const CLIENT_NAME: &str = "mcp-agent";

// ─── State ───────────────────────────────────────────────────────────────────

/// Connection state of a protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// A client bound to one tool server.
pub struct McpClient {
    name: String,
    /// How to (re)connect. `None` for clients built around an injected transport.
    config: Option<ServerConfig>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    state: std::sync::Mutex<ClientState>,
    init_lock: Mutex<()>,
    next_id: AtomicU64,
    init_result: std::sync::Mutex<Option<InitializeResult>>,
    call_timeout: Duration,
}

impl McpClient {
    /// Create a client that connects lazily from configuration.
    pub fn new(name: &str, config: ServerConfig) -> Self {
        Self::build(name, Some(config), None)
    }

    /// Create a client over an already-established transport.
    pub fn with_transport(name: &str, transport: Arc<dyn Transport>) -> Self {
        Self::build(name, None, Some(transport))
    }

    fn build(name: &str, config: Option<ServerConfig>, transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            name: name.to_string(),
            config,
            transport: Mutex::new(transport),
            state: std::sync::Mutex::new(ClientState::Uninitialized),
            init_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            init_result: std::sync::Mutex::new(None),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the steady-state call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Server name this client was configured under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ClientState::Closed)
    }

    fn set_state(&self, next: ClientState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                tracing::debug!(server = %self.name, from = ?*state, to = ?next, "client state change");
                *state = next;
            }
        }
    }

    /// Identity reported by the server during the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.init_result
            .lock()
            .ok()
            .and_then(|r| r.as_ref().and_then(|r| r.server_info.clone()))
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect (spawning the server if needed) and perform the handshake.
    ///
    /// A no-op once `Ready`. On failure the client returns to `Uninitialized`;
    /// transport-level failures also drop the transport so the next attempt
    /// reconnects from scratch.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let _guard = self.init_lock.lock().await;
        if self.state() == ClientState::Ready {
            return Ok(());
        }

        self.set_state(ClientState::Initializing);
        let started = Instant::now();

        let transport = match self.connect().await {
            Ok(t) => t,
            Err(e) => {
                self.fail_initialize();
                return Err(e);
            }
        };

        match self.handshake(&transport).await {
            Ok(result) => {
                tracing::info!(
                    server = %self.name,
                    protocol = result.protocol_version.as_deref().unwrap_or("unknown"),
                    peer = result
                        .server_info
                        .as_ref()
                        .and_then(|i| i.name.as_deref())
                        .unwrap_or("unknown"),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool server initialized"
                );
                if let Ok(mut slot) = self.init_result.lock() {
                    *slot = Some(result);
                }
                self.set_state(ClientState::Ready);
                Ok(())
            }
            Err(e) => {
                let diagnostics = transport.diagnostics().await;
                tracing::warn!(
                    server = %self.name,
                    error = %e,
                    stderr = %diagnostics,
                    "initialize failed"
                );
                if e.is_transport() {
                    self.release_transport().await;
                }
                self.fail_initialize();
                Err(with_diagnostics(e, &diagnostics))
            }
        }
    }

    fn fail_initialize(&self) {
        self.set_state(ClientState::Uninitialized);
    }

    /// Return the live transport, creating it from config if there is none.
    async fn connect(&self) -> Result<Arc<dyn Transport>, McpError> {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.as_ref() {
            return Ok(Arc::clone(transport));
        }

        let config = self.config.as_ref().ok_or_else(|| McpError::Closed {
            server: self.name.clone(),
        })?;

        let transport: Arc<dyn Transport> = match config {
            ServerConfig::Stdio(stdio) => Arc::new(StdioTransport::spawn(&self.name, stdio)?),
            ServerConfig::Http(http) => Arc::new(HttpTransport::new(&self.name, &http.url)?),
        };
        *slot = Some(Arc::clone(&transport));
        Ok(transport)
    }

    async fn handshake(&self, transport: &Arc<dyn Transport>) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .request_on(transport, "initialize", Some(params), HANDSHAKE_TIMEOUT)
            .await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
                server: self.name.clone(),
                reason: format!("failed to parse initialize result: {e}"),
            })?;

        transport
            .send_notification(JsonRpcRequest::notification("initialized", None))
            .await;
        Ok(init)
    }

    async fn release_transport(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// Release the transport (terminating a spawned server) and reset the
    /// client to `Uninitialized`. Safe to call repeatedly; a later call that
    /// needs the server reconnects from configuration.
    pub async fn close(&self) {
        self.release_transport().await;
        if let Ok(mut slot) = self.init_result.lock() {
            slot.take();
        }
        self.set_state(ClientState::Uninitialized);
        tracing::info!(server = %self.name, "client closed");
    }

    async fn ensure_ready(&self) -> Result<(), McpError> {
        if self.state() != ClientState::Ready {
            self.initialize().await?;
        }
        Ok(())
    }

    // ─── Requests ────────────────────────────────────────────────────────

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Closed {
                server: self.name.clone(),
            })?;
        self.request_on(&transport, method, params, self.call_timeout)
            .await
    }

    async fn request_on(
        &self,
        transport: &Arc<dyn Transport>,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let started = Instant::now();

        let response = tokio::time::timeout(timeout, transport.send_request(request))
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        tracing::debug!(
            server = %self.name,
            method,
            id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        extract_result(&self.name, response)
    }

    /// List the server's tools, initializing first if needed.
    ///
    /// Entries that fail to parse are logged and skipped.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_ready().await?;
        let result = self.request("tools/list", None).await?;
        parse_tool_list(&self.name, &result)
    }

    /// Invoke a tool and return its textual output.
    ///
    /// The first text entry of the result's `content` array is the output;
    /// any other shape is returned as serialized JSON.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        self.ensure_ready().await?;
        let started = Instant::now();
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;

        if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            tracing::warn!(server = %self.name, tool = tool_name, "tool reported an error result");
        }
        tracing::info!(
            server = %self.name,
            tool = tool_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call completed"
        );
        Ok(extract_tool_text(&result))
    }
}

// ─── Result Helpers ──────────────────────────────────────────────────────────

fn parse_tool_list(
    server: &str,
    result: &serde_json::Value,
) -> Result<Vec<McpToolDefinition>, McpError> {
    let entries = result
        .get("tools")
        .and_then(|t| t.as_array())
        .ok_or_else(|| McpError::MalformedResponse {
            server: server.to_string(),
            reason: "tools/list result has no 'tools' array".into(),
        })?;

    let tools = entries
        .iter()
        .filter_map(|entry| {
            match serde_json::from_value::<McpToolDefinition>(entry.clone()) {
                Ok(def) if !def.name.trim().is_empty() => Some(def),
                Ok(_) => {
                    tracing::warn!(server, "skipping tool with empty name");
                    None
                }
                Err(e) => {
                    tracing::warn!(server, error = %e, "skipping unparseable tool entry");
                    None
                }
            }
        })
        .collect();
    Ok(tools)
}

/// Pull the textual output out of a `tools/call` result.
pub fn extract_tool_text(result: &serde_json::Value) -> String {
    let first_text = result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|items| {
            items.iter().find_map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
        });

    match first_text {
        Some(text) => text.to_string(),
        None => serde_json::to_string(result).unwrap_or_default(),
    }
}

/// Attach captured server stderr to connection-class failures.
fn with_diagnostics(err: McpError, diagnostics: &str) -> McpError {
    if diagnostics.is_empty() {
        return err;
    }
    match err {
        McpError::ConnectionFailed { server, reason } => McpError::ConnectionFailed {
            server,
            reason: format!("{reason}{diagnostics}"),
        },
        McpError::MalformedResponse { server, reason } => McpError::MalformedResponse {
            server,
            reason: format!("{reason}{diagnostics}"),
        },
        other => other,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
