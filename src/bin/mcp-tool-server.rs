//! Serve the news, weather and reminder tools over stdio or HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use mcp_agent::server::{build_dispatcher, serve_http, serve_stdio, ToolSet};
use mcp_agent::{init_tracing, LogTarget};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct ServerOpts {
    /// Serve newline-delimited JSON-RPC on stdin/stdout (the default).
    #[arg(long, conflicts_with = "http")]
    stdio: bool,

    /// Listen for JSON-RPC POSTs on this address instead of stdio.
    #[arg(long, value_name = "ADDR")]
    http: Option<SocketAddr>,

    /// Tool sets to expose.
    #[arg(long, value_delimiter = ',', default_value = "news,weather,reminder")]
    tools: Vec<ToolSet>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = ServerOpts::parse();
    // stdout carries protocol traffic in stdio mode.
    init_tracing(LogTarget::Stderr)?;

    let dispatcher = Arc::new(
        build_dispatcher(&opts.tools).context("failed to set up tools")?,
    );

    match opts.http {
        Some(addr) => serve_http(dispatcher, addr)
            .await
            .with_context(|| format!("http server on {addr} failed"))?,
        None => serve_stdio(dispatcher).await.context("stdio server failed")?,
    }
    Ok(())
}
