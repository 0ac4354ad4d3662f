//! JSON-RPC transports.
//!
//! A [`Transport`] moves single JSON-RPC messages to a tool server and back.
//! Requests expect one correlated reply; notifications are fire-and-forget.
//!
//! [`StdioTransport`] speaks newline-delimited JSON over a pair of byte
//! streams (normally a child process's stdin/stdout):
//! - one line per message, flushed after every write
//! - requests are serialized, so replies are consumed in send order
//! - reply ids are still checked; a mismatch poisons the transport
//! - a write cut off mid-line also poisons it, since the peer's framing is lost
//!
//! The HTTP variant lives in [`super::http`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};

use super::errors::McpError;
use super::lifecycle::{format_stderr_suffix, ManagedProcess};
use super::types::{JsonRpcRequest, JsonRpcResponse, StdioServerConfig};

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// A bidirectional JSON-RPC channel to one tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its reply.
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification. Delivery failures are logged, never returned.
    async fn send_notification(&self, notification: JsonRpcRequest);

    /// Release the underlying streams or connections. Safe to call repeatedly.
    async fn close(&self);

    /// Peer diagnostics (such as captured stderr) to append to error messages.
    async fn diagnostics(&self) -> String {
        String::new()
    }
}

// ─── Stdio Transport ─────────────────────────────────────────────────────────

/// Unanswered request ids tracked before the peer is treated as hung.
const MAX_ABANDONED: usize = 128;

type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;
type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Newline-delimited JSON-RPC over a writer/reader pair.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<Option<LineWriter>>,
    reader: Mutex<Option<LineReader>>,
    /// Held for the whole write-then-read of a request.
    request_lock: Mutex<()>,
    /// Ids whose callers gave up before the reply was read.
    abandoned: std::sync::Mutex<HashSet<u64>>,
    poisoned: AtomicBool,
    /// Flipped by `close()` to wake any request blocked on a read.
    closing: watch::Sender<bool>,
    process: Mutex<Option<ManagedProcess>>,
}

impl StdioTransport {
    /// Create a transport over arbitrary byte streams.
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Some(Box::new(writer))),
            reader: Mutex::new(Some(Box::new(BufReader::new(reader)))),
            request_lock: Mutex::new(()),
            abandoned: std::sync::Mutex::new(HashSet::new()),
            poisoned: AtomicBool::new(false),
            closing: watch::Sender::new(false),
            process: Mutex::new(None),
        }
    }

    /// Spawn the configured server process and attach to its stdio.
    pub fn spawn(server_name: &str, config: &StdioServerConfig) -> Result<Self, McpError> {
        let (process, pipes) = ManagedProcess::spawn(server_name, config)?;
        let mut transport = Self::new(server_name, pipes.stdin, pipes.stdout);
        transport.process = Mutex::new(Some(process));
        Ok(transport)
    }

    async fn write_line(&self, message: &JsonRpcRequest) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message).map_err(|e| McpError::MalformedResponse {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');

        let mut guard = self.writer.lock().await;
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(self.closed());
        }
        let writer = guard.as_mut().ok_or_else(|| self.closed())?;
        let mut partial = PartialWrite {
            poisoned: &self.poisoned,
            complete: false,
        };
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpError::ConnectionFailed {
                server: self.server_name.clone(),
                reason: format!("failed to write to server input: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::ConnectionFailed {
            server: self.server_name.clone(),
            reason: format!("failed to flush server input: {e}"),
        })?;
        partial.complete = true;
        Ok(())
    }

    /// Read lines until the reply for `expected` arrives.
    ///
    /// Blank lines, non-JSON lines (peer log noise), peer-initiated
    /// notifications, and late replies to abandoned requests are skipped.
    /// Any other id is a protocol violation.
    async fn read_reply(&self, expected: u64) -> Result<JsonRpcResponse, McpError> {
        let mut closing = self.closing.subscribe();
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(|| self.closed())?;
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                _ = closing.wait_for(|closed| *closed) => return Err(self.closed()),
            };
            let bytes_read = read.map_err(|e| McpError::ConnectionFailed {
                server: self.server_name.clone(),
                reason: format!("failed to read server output: {e}"),
            })?;

            if bytes_read == 0 {
                return Err(McpError::ConnectionFailed {
                    server: self.server_name.clone(),
                    reason: "server output closed (process may have exited)".into(),
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: serde_json::Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    tracing::debug!(server = %self.server_name, line = %trimmed, "skipping non-JSON output");
                    continue;
                }
            };

            if value.get("method").is_some() && value.get("id").is_none() {
                tracing::debug!(server = %self.server_name, "skipping server notification");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(|e| McpError::MalformedResponse {
                    server: self.server_name.clone(),
                    reason: format!("invalid JSON-RPC reply: {e}"),
                })?;

            match response.numeric_id() {
                Some(id) if id == expected => return Ok(response),
                Some(id) if self.forget_abandoned(id) => {
                    tracing::debug!(server = %self.server_name, id, "discarding late reply");
                    continue;
                }
                _ => {
                    self.poisoned.store(true, Ordering::SeqCst);
                    let got = response
                        .id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "null".to_string());
                    tracing::error!(
                        server = %self.server_name,
                        expected,
                        got = %got,
                        "reply id mismatch, transport poisoned"
                    );
                    return Err(McpError::ProtocolViolation {
                        server: self.server_name.clone(),
                        expected,
                        got,
                    });
                }
            }
        }
    }

    fn forget_abandoned(&self, id: u64) -> bool {
        self.abandoned
            .lock()
            .map(|mut set| set.remove(&id))
            .unwrap_or(false)
    }

    fn closed(&self) -> McpError {
        McpError::Closed {
            server: self.server_name.clone(),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let id = request.numeric_id().ok_or_else(|| McpError::ConfigError {
            reason: format!("request '{}' has no numeric id", request.method),
        })?;

        let _in_flight = self.request_lock.lock().await;
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(self.closed());
        }

        self.write_line(&request).await?;

        let mut pending = PendingReply {
            abandoned: &self.abandoned,
            poisoned: &self.poisoned,
            id,
            answered: false,
        };
        let response = self.read_reply(id).await;
        pending.answered = true;
        response
    }

    async fn send_notification(&self, notification: JsonRpcRequest) {
        if let Err(e) = self.write_line(&notification).await {
            tracing::warn!(
                server = %self.server_name,
                method = %notification.method,
                error = %e,
                "notification not delivered"
            );
        }
    }

    async fn close(&self) {
        self.closing.send_replace(true);
        // Dropping the writer closes the peer's stdin, which is its cue to exit.
        self.writer.lock().await.take();
        if let Some(process) = self.process.lock().await.take() {
            process.shutdown().await;
        }
        self.reader.lock().await.take();
        if let Ok(mut set) = self.abandoned.lock() {
            set.clear();
        }
    }

    async fn diagnostics(&self) -> String {
        match self.process.lock().await.as_ref() {
            Some(process) => format_stderr_suffix(&process.stderr_tail()),
            None => String::new(),
        }
    }
}

/// Marks a request id as abandoned if the caller is cancelled mid-read.
struct PendingReply<'a> {
    abandoned: &'a std::sync::Mutex<HashSet<u64>>,
    poisoned: &'a AtomicBool,
    id: u64,
    answered: bool,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        if let Ok(mut set) = self.abandoned.lock() {
            if set.len() >= MAX_ABANDONED {
                set.clear();
                self.poisoned.store(true, Ordering::SeqCst);
                tracing::warn!(id = self.id, "too many unanswered requests, transport poisoned");
            } else {
                set.insert(self.id);
            }
        }
    }
}

/// Poisons the transport if a line write is cancelled or fails part way.
struct PartialWrite<'a> {
    poisoned: &'a AtomicBool,
    complete: bool,
}

impl Drop for PartialWrite<'_> {
    fn drop(&mut self) {
        if !self.complete {
            self.poisoned.store(true, Ordering::SeqCst);
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a reply, converting error objects to `McpError`.
pub fn extract_result(
    server: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ProtocolError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or_else(|| McpError::MalformedResponse {
        server: server.to_string(),
        reason: "response missing both result and error".into(),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
