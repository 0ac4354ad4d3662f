//! Tool-calling chat agent over the Model Context Protocol.
//!
//! - [`mcp_client`]: JSON-RPC transports, protocol clients, tool registry
//! - [`inference`]: OpenAI-compatible chat completions
//! - [`agent_core`]: orchestration loop, reminder poller, chat session
//! - [`server`]: the peer side, serving tools over stdio or HTTP

pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod server;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// A rotated file under the data directory, named `{name}.log`.
    File { name: String },
    /// Standard error. Tool servers on stdio must never log to stdout.
    Stderr,
}

/// Return the platform-standard data directory.
///
/// - macOS: `~/Library/Application Support/mcp-agent/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-agent\`
/// - Linux: `$XDG_DATA_HOME/mcp-agent/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-agent/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-agent");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-agent")
}

/// Initialize the tracing subscriber.
///
/// For a file target, existing logs are rotated first (`x.log` → `x.log.1`
/// → … → `.3`) and the fresh file is written through a line-flushing writer.
/// `RUST_LOG` overrides the default `mcp_agent=info,warn` filter. Calling
/// this twice is harmless; the second call is ignored.
pub fn init_tracing(target: LogTarget) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_agent=info,warn"));

    match target {
        LogTarget::Stderr => {
            let _ = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .try_init();
        }
        LogTarget::File { name } => {
            let log_dir = data_dir();
            std::fs::create_dir_all(&log_dir)?;
            let log_path = log_dir.join(format!("{name}.log"));
            rotate_log_file(&log_path, 3);

            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;

            let _ = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(FlushingWriter::new(log_file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .try_init();

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                log_file = %log_path.display(),
                pid = std::process::id(),
                "=== {name} starting ==="
            );
        }
    }
    Ok(())
}

/// Rotate log files: `x.log` → `x.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
