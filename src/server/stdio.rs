//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! One request per line in, at most one response per line out. Logs go to
//! stderr; stdout carries protocol traffic only.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::dispatcher::Dispatcher;

/// Serve requests read from `reader` until EOF, writing replies to `writer`.
///
/// Requests are handled in arrival order; each reply is flushed before the
/// next line is read.
pub async fn serve_lines<R, W>(
    dispatcher: Arc<Dispatcher>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(reply) = dispatcher.handle_line(line).await {
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    tracing::info!("stdin closed, stopping");
    Ok(())
}

/// Serve on the process's own stdin/stdout.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    tracing::info!(tools = ?dispatcher.tool_names(), "serving on stdio");
    serve_lines(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}
