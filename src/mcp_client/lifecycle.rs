//! Tool-server process lifecycle.
//!
//! Spawns a server as a child process with piped stdio, keeps a tail of its
//! stderr for diagnostics, and shuts it down (gracefully, then by force).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::errors::McpError;
use super::types::StdioServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful exit after stdin is closed, before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum stderr characters retained for error messages.
const STDERR_TAIL_CHARS: usize = 2000;

// ─── ManagedProcess ──────────────────────────────────────────────────────────

/// A running tool-server child process.
pub struct ManagedProcess {
    name: String,
    child: Child,
    stderr_tail: Arc<Mutex<String>>,
}

/// Stdio handles taken from a freshly spawned process.
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl ManagedProcess {
    /// Spawn the configured command with piped stdin/stdout/stderr.
    pub fn spawn(name: &str, config: &StdioServerConfig) -> Result<(Self, ProcessPipes), McpError> {
        if config.command.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: format!("server '{name}' has an empty command"),
            });
        }

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{}: {e}", config.command),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(name.to_string(), stderr, Arc::clone(&stderr_tail));
        }

        tracing::info!(
            server = name,
            command = %config.command,
            pid = child.id().unwrap_or_default(),
            "spawned tool server"
        );

        Ok((
            Self {
                name: name.to_string(),
                child,
                stderr_tail,
            },
            ProcessPipes { stdin, stdout },
        ))
    }

    /// The most recent stderr output (up to 2000 chars).
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.trim().to_string())
            .unwrap_or_default()
    }

    /// Check if the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit, killing it if it outlives the grace period.
    ///
    /// The caller is expected to have closed stdin first so a well-behaved
    /// server sees EOF and exits on its own.
    pub async fn shutdown(mut self) {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.name, %status, "tool server exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "tool server did not exit, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Forward the child's stderr to the log and keep its tail for diagnostics.
///
/// Draining also keeps a chatty server from blocking on a full stderr pipe.
fn spawn_stderr_drain(name: String, stderr: ChildStderr, tail: Arc<Mutex<String>>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, stderr = %line, "tool server stderr");
            if let Ok(mut buf) = tail.lock() {
                append_bounded(&mut buf, &line, STDERR_TAIL_CHARS);
            }
        }
    });
}

/// Append a line, dropping the oldest characters beyond `max_chars`.
fn append_bounded(buf: &mut String, line: &str, max_chars: usize) {
    buf.push_str(line);
    buf.push('\n');
    let count = buf.chars().count();
    if count > max_chars {
        let cut = buf
            .char_indices()
            .nth(count - max_chars)
            .map(|(i, _)| i)
            .unwrap_or(0);
        buf.drain(..cut);
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {stderr}")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_bounded_keeps_tail() {
        let mut buf = String::new();
        append_bounded(&mut buf, "first", 8);
        append_bounded(&mut buf, "second", 8);
        assert_eq!(buf.chars().count(), 8);
        assert!(buf.ends_with("second\n"));
    }

    #[test]
    fn test_append_bounded_multibyte() {
        let mut buf = String::new();
        append_bounded(&mut buf, "привет мир", 5);
        assert_eq!(buf, " мир\n");
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("boom"), " | stderr: boom");
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let config = StdioServerConfig {
            command: "  ".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
        };
        let err = ManagedProcess::spawn("news", &config).err().unwrap();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = StdioServerConfig {
            command: "definitely-not-a-real-binary-4242".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
        };
        let err = ManagedProcess::spawn("news", &config).err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { ref name, .. } if name == "news"));
    }
}
