//! Interactive terminal chat against the configured model and tool servers.
//!
//! Lines starting with `/` are commands: `/clear`, `/history`, `/reminders`,
//! `/tools`, `/quit`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

use mcp_agent::agent_core::{ChatEvent, ChatSession, SqliteStore, ToolProvider, ToolRouter};
use mcp_agent::config::{find_config_path, AppConfig};
use mcp_agent::inference::{CompletionBackend, InferenceClient};
use mcp_agent::{data_dir, init_tracing, LogTarget};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct ChatOpts {
    /// Config file. Defaults to $MCP_AGENT_CONFIG or the nearest mcp-agent.yaml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chat history database. Overrides `agent.database_path`.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log to stderr instead of the data directory.
    #[arg(long)]
    log_stderr: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = ChatOpts::parse();
    let target = if opts.log_stderr {
        LogTarget::Stderr
    } else {
        LogTarget::File { name: "mcp-chat".into() }
    };
    init_tracing(target)?;

    let config = match opts.config {
        Some(path) => AppConfig::load(&path)?,
        None => {
            let cwd = std::env::current_dir()?;
            match find_config_path(&cwd) {
                Ok(path) => AppConfig::load(&path)?,
                Err(e) => {
                    eprintln!("{e}; using defaults with no tool servers");
                    AppConfig::default()
                }
            }
        }
    };

    let backend: Arc<dyn CompletionBackend> =
        Arc::new(InferenceClient::new(config.model.clone()).context("invalid model config")?);

    let router = Arc::new(ToolRouter::from_config(
        &config.servers,
        config.agent.call_timeout(),
    ));
    let connected = router.connect_all().await;
    let tools: Option<Arc<dyn ToolProvider>> = if config.servers.is_empty() {
        None
    } else {
        Some(Arc::clone(&router) as Arc<dyn ToolProvider>)
    };

    let db_path = opts
        .database
        .or_else(|| config.agent.database_path.clone())
        .unwrap_or_else(|| data_dir().join("chat.db"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path).context("failed to open chat history")?);

    let session = ChatSession::new(
        backend,
        tools,
        store,
        config.agent.orchestrator_settings(),
    );

    println!(
        "model: {} · servers: {}/{} connected · /quit to exit",
        config.model.model,
        connected.len(),
        config.servers.len()
    );

    let printer = tokio::spawn(print_events(session.subscribe()));
    let result = repl(&session, &router).await;

    session.shutdown().await;
    printer.abort();
    result
}

async fn repl(session: &ChatSession, router: &ToolRouter) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear().await?;
                println!("(conversation cleared)");
            }
            "/history" => {
                for message in session.history()? {
                    println!(
                        "[{}] {}: {}",
                        message.timestamp.format("%H:%M:%S"),
                        message.role.as_str(),
                        message.content
                    );
                }
            }
            "/reminders" => {
                for entry in session.side_transcript() {
                    println!("[{}] {}", entry.timestamp.format("%H:%M:%S"), entry.content);
                }
            }
            "/tools" => {
                let registry = router.rebuild_registry().await;
                for tool in registry.tools() {
                    println!("{} ({})", tool.definition.name, tool.server());
                }
            }
            text => {
                // Events are printed by the subscriber task.
                session.send_message(text).await;
            }
        }
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::Intermediate(text)) => println!("{text}"),
            Ok(ChatEvent::Final(text)) => println!("{text}\n"),
            Ok(ChatEvent::Reminder(text)) => println!("\n{text}\n"),
            Ok(ChatEvent::Warning(text)) | Ok(ChatEvent::Error(text)) => eprintln!("{text}"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
