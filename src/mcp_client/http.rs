//! JSON-RPC over HTTP POST.
//!
//! One message per POST body; the reply is the response body. There is no
//! pipelining, so each call correlates on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};
use tokio::sync::watch;

use super::errors::McpError;
use super::transport::Transport;
use super::types::{JsonRpcRequest, JsonRpcResponse};

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a single POST; the client applies tighter per-call bounds.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON-RPC transport over HTTP.
pub struct HttpTransport {
    server_name: String,
    url: Url,
    http: HttpClient,
    closed: AtomicBool,
    /// Flipped by `close()` so in-flight POSTs resolve at once.
    closing: watch::Sender<bool>,
}

impl HttpTransport {
    /// Create a transport for the given endpoint URL.
    pub fn new(server_name: &str, url: &str) -> Result<Self, McpError> {
        let url = Url::parse(url).map_err(|e| McpError::ConfigError {
            reason: format!("invalid URL for server '{server_name}': {url}: {e}"),
        })?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| McpError::ConnectionFailed {
                server: server_name.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: server_name.to_string(),
            url,
            http,
            closed: AtomicBool::new(false),
            closing: watch::Sender::new(false),
        })
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }

        self.http
            .post(self.url.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| self.classify_send_error(&message.method, e))
    }

    fn closed_error(&self) -> McpError {
        McpError::Closed {
            server: self.server_name.clone(),
        }
    }

    fn classify_send_error(&self, method: &str, err: reqwest::Error) -> McpError {
        if err.is_timeout() {
            return McpError::Timeout {
                server: self.server_name.clone(),
                method: method.to_string(),
                timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
            };
        }
        let detail = error_chain(&err);
        McpError::ConnectionFailed {
            server: self.server_name.clone(),
            reason: format!("{detail}{}", connection_hint(&self.url, &detail)),
        }
    }

    async fn exchange(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let response = self.post(request).await?;
        let status = response.status();
        let body = response.text().await.map_err(|e| McpError::ConnectionFailed {
            server: self.server_name.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;

        // Error replies may arrive with a non-2xx status; prefer the JSON-RPC body.
        let parsed: Result<JsonRpcResponse, _> = serde_json::from_str(&body);
        let reply = match parsed {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(McpError::MalformedResponse {
                    server: self.server_name.clone(),
                    reason: format!("HTTP {}: {}", status.as_u16(), truncate_body(&body)),
                });
            }
            Err(e) => {
                return Err(McpError::MalformedResponse {
                    server: self.server_name.clone(),
                    reason: format!("invalid JSON-RPC reply: {e}"),
                });
            }
        };

        if let (Some(expected), Some(got)) = (request.numeric_id(), reply.id.as_ref()) {
            if got.as_u64() != Some(expected) {
                return Err(McpError::ProtocolViolation {
                    server: self.server_name.clone(),
                    expected,
                    got: got.to_string(),
                });
            }
        }

        tracing::debug!(
            server = %self.server_name,
            method = %request.method,
            status = status.as_u16(),
            "http reply received"
        );
        Ok(reply)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let mut closing = self.closing.subscribe();
        tokio::select! {
            result = self.exchange(&request) => result,
            _ = closing.wait_for(|closed| *closed) => Err(self.closed_error()),
        }
    }

    async fn send_notification(&self, notification: JsonRpcRequest) {
        let mut closing = self.closing.subscribe();
        let result = tokio::select! {
            result = self.post(&notification) => result.map(drop),
            _ = closing.wait_for(|closed| *closed) => Err(self.closed_error()),
        };
        if let Err(e) = result {
            tracing::debug!(
                server = %self.server_name,
                method = %notification.method,
                error = %e,
                "notification post failed"
            );
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closing.send_replace(true);
    }
}

/// Flatten a reqwest error and its sources into one line.
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Actionable advice appended to connection failures.
fn connection_hint(url: &Url, detail: &str) -> String {
    let lower = detail.to_lowercase();
    if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") {
        return format!(
            ". Host '{}' could not be resolved; check the server URL",
            url.host_str().unwrap_or_default()
        );
    }

    let port = url.port_or_known_default().unwrap_or(80);
    match url.host_str() {
        Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]") => format!(
            ". Make sure the server is running. From an emulator or container the host \
             loopback is usually http://10.0.2.2:{port} or http://host.docker.internal:{port}"
        ),
        _ => ". Make sure the server is running and reachable from this machine".to_string(),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let mut out: String = body.chars().take(MAX).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = HttpTransport::new("weather", "not a url").err().unwrap();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[test]
    fn test_loopback_hint_mentions_alias() {
        let url = Url::parse("http://localhost:3000/mcp").unwrap();
        let hint = connection_hint(&url, "tcp connect error: Connection refused");
        assert!(hint.contains("http://10.0.2.2:3000"));
    }

    #[test]
    fn test_dns_hint_names_host() {
        let url = Url::parse("http://weather.invalid:3000").unwrap();
        let hint = connection_hint(&url, "error trying to connect: dns error: failed to lookup");
        assert!(hint.contains("weather.invalid"));
        assert!(!hint.contains("10.0.2.2"));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(600);
        assert_eq!(truncate_body(&long).chars().count(), 503);
        assert_eq!(truncate_body("short"), "short");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_failed() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new("weather", &format!("http://127.0.0.1:{port}")).unwrap();
        let err = transport
            .send_request(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        match err {
            McpError::ConnectionFailed { reason, .. } => assert!(reason.contains("10.0.2.2")),
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notification_never_fails_and_close_blocks_requests() {
        let transport = HttpTransport::new("weather", "http://127.0.0.1:9").unwrap();
        transport
            .send_notification(JsonRpcRequest::notification("initialized", None))
            .await;
        transport.close().await;
        let err = transport
            .send_request(JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_close_releases_in_flight_request() {
        // A server that accepts and then never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport = std::sync::Arc::new(
            HttpTransport::new("weather", &format!("http://127.0.0.1:{port}")).unwrap(),
        );
        let pending = {
            let transport = std::sync::Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .send_request(JsonRpcRequest::new(7, "tools/call", None))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        transport.close().await;

        let result = tokio::time::timeout(Duration::from_secs(3), pending)
            .await
            .expect("request still blocked after close")
            .unwrap();
        assert!(matches!(result, Err(McpError::Closed { .. })));
        server.abort();
    }
}
