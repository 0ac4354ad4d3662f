//! JSON-RPC over HTTP POST.
//!
//! Each POST body is one message. Requests get a `200` with the JSON-RPC
//! reply (errors included); notifications get an empty `202`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

use super::dispatcher::Dispatcher;

/// Routes: `POST /` and `POST /mcp` for messages, `GET /health` for probes.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", post(handle_message))
        .route("/mcp", post(handle_message))
        .route("/health", get(health))
        .with_state(dispatcher)
}

async fn handle_message(State(dispatcher): State<Arc<Dispatcher>>, body: String) -> Response {
    match dispatcher.handle_line(&body).await {
        Some(reply) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            reply,
        )
            .into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve_http(dispatcher: Arc<Dispatcher>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(dispatcher, listener, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, tools = ?dispatcher.tool_names(), "serving on http");
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    tracing::info!("shutdown requested");
}
