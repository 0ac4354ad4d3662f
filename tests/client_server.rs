//! Protocol client against the in-crate tool server, over both transports.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{duplex, BufReader};
use tokio::net::TcpListener;

use mcp_agent::agent_core::{
    ChatEvent, ChatSession, InMemoryStore, OrchestratorSettings, ToolProvider, ToolRouter,
};
use mcp_agent::inference::{
    ChatMessage, Completion, CompletionBackend, InferenceError, TokenUsage, ToolCall,
    ToolDefinition,
};
use mcp_agent::mcp_client::http::HttpTransport;
use mcp_agent::mcp_client::types::HttpServerConfig;
use mcp_agent::mcp_client::{
    ClientState, McpClient, McpError, McpToolDefinition, ServerConfig, StdioTransport, Transport,
};
use mcp_agent::server::dispatcher::opt_str;
use mcp_agent::server::stdio::serve_lines;
use mcp_agent::server::{serve_listener, Arguments, Dispatcher, ToolError, ToolHandler};

struct Shout;

#[async_trait]
impl ToolHandler for Shout {
    fn descriptor(&self) -> McpToolDefinition {
        McpToolDefinition {
            name: "shout".into(),
            description: Some("Upper-case the input".into()),
            input_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }
    }

    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError> {
        Ok(opt_str(arguments, "text").unwrap_or_default().to_uppercase())
    }
}

fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(
        Dispatcher::new("test-server", "1.2.3")
            .with_tools([Arc::new(Shout) as Arc<dyn ToolHandler>]),
    )
}

/// A client wired to a dispatcher through in-memory pipes.
fn stdio_client(name: &str) -> Arc<McpClient> {
    let (client_out, server_in) = duplex(64 * 1024);
    let (server_out, client_in) = duplex(64 * 1024);
    tokio::spawn(serve_lines(dispatcher(), BufReader::new(server_in), server_out));
    let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new(name, client_out, client_in));
    Arc::new(McpClient::with_transport(name, transport))
}

async fn http_client(name: &str) -> (Arc<McpClient>, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(serve_listener(dispatcher(), listener, async move {
        let _ = stopped.await;
    }));
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(name, &format!("http://{addr}/mcp")).unwrap());
    (Arc::new(McpClient::with_transport(name, transport)), stop)
}

async fn exercise(client: &McpClient) {
    client.initialize().await.unwrap();
    assert_eq!(client.state(), ClientState::Ready);
    assert_eq!(client.server_info().unwrap().name.as_deref(), Some("test-server"));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].required_params(), vec!["text"]);

    let out = client.call_tool("shout", json!({"text": "hello"})).await.unwrap();
    assert_eq!(out, "HELLO");

    let err = client.call_tool("whisper", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ProtocolError { code: -32602, .. }));

    let err = client.call_tool("shout", json!({})).await.unwrap_err();
    match err {
        McpError::ProtocolError { code, message, .. } => {
            assert_eq!(code, -32602);
            assert!(message.contains("text"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_stdio_round_trip() {
    let client = stdio_client("local");
    exercise(&client).await;
    client.close().await;
    assert_eq!(client.state(), ClientState::Uninitialized);
}

#[tokio::test]
async fn test_http_round_trip() {
    let (client, _stop) = http_client("remote").await;
    exercise(&client).await;
}

#[tokio::test]
async fn test_configured_client_reconnects_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_stop, stopped) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(serve_listener(dispatcher(), listener, async move {
        let _ = stopped.await;
    }));
    let config = ServerConfig::Http(HttpServerConfig {
        url: format!("http://{addr}/mcp"),
    });
    let client = McpClient::new("remote", config);

    exercise(&client).await;
    client.close().await;
    assert_eq!(client.state(), ClientState::Uninitialized);

    // The next call builds a fresh transport and handshakes again.
    let text = client.call_tool("shout", json!({"text": "again"})).await.unwrap();
    assert_eq!(text, "AGAIN");
    assert_eq!(client.state(), ClientState::Ready);
}

#[tokio::test]
async fn test_router_over_both_transports_first_wins() {
    let (remote, _stop) = http_client("b-remote").await;
    let router = ToolRouter::new(vec![stdio_client("a-local"), remote]);
    assert_eq!(router.connect_all().await.len(), 2);

    let tools = router.list_tools_for_llm().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(router.registry().get_server_for_tool("shout"), Some("a-local"));
    assert_eq!(router.registry().duplicates().len(), 1);

    let out = router.call_tool("shout", r#"{"text":"routed"}"#).await.unwrap();
    assert_eq!(out, "ROUTED");
    router.close_all().await;
}

/// Replays canned completions in order.
struct Script(Mutex<VecDeque<Completion>>);

#[async_trait]
impl CompletionBackend for Script {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[tokio::test]
async fn test_chat_session_calls_tool_end_to_end() {
    let usage = Some(TokenUsage { prompt_tokens: 5, completion_tokens: 5, total_tokens: 10 });
    let backend = Arc::new(Script(Mutex::new(VecDeque::from([
        Completion {
            content: Some("Let me shout that.".into()),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "shout".into(),
                arguments: r#"{"text":"hi there"}"#.into(),
            }],
            usage,
        },
        Completion {
            content: Some("It says HI THERE.".into()),
            tool_calls: vec![],
            usage,
        },
    ]))));

    let router = Arc::new(ToolRouter::new(vec![stdio_client("local")]));
    router.connect_all().await;
    let session = ChatSession::new(
        backend,
        Some(router as Arc<dyn ToolProvider>),
        Arc::new(InMemoryStore::new()),
        OrchestratorSettings::default(),
    );
    let mut events = session.subscribe();

    let closing = session.send_message("shout hi there").await.unwrap();
    let ChatEvent::Final(footer) = closing else {
        panic!("expected a final event, got {closing:?}");
    };
    assert!(footer.contains("20 tokens"));

    let mut texts = Vec::new();
    while let Ok(event) = events.try_recv() {
        texts.push(event);
    }
    assert_eq!(texts[0], ChatEvent::Intermediate("Let me shout that.".into()));
    assert_eq!(texts[1], ChatEvent::Intermediate("It says HI THERE.".into()));

    let history = session.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Let me shout that.\n\nIt says HI THERE.");
    session.shutdown().await;
}
