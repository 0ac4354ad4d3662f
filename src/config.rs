//! Application configuration — `mcp-agent.yaml`.
//!
//! ```yaml
//! model:
//!   base_url: ${LLM_BASE_URL:-https://api.deepseek.com/v1}
//!   model: deepseek-chat
//!   api_key: ${DEEPSEEK_API_KEY}
//! agent:
//!   max_iterations: 10
//!   reminder_interval_secs: 40
//! servers:
//!   news:
//!     transport: stdio
//!     command: mcp-tool-server
//!     args: ["--stdio", "--tools", "news,reminder"]
//!   weather:
//!     transport: http
//!     url: http://127.0.0.1:8931/mcp
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded before parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::agent_core::orchestrator::{
    DEFAULT_CONTEXT_MESSAGES, DEFAULT_REMINDER_INTERVAL, DEFAULT_SYSTEM_PROMPT, MAX_ITERATIONS,
};
use crate::agent_core::OrchestratorSettings;
use crate::inference::config::interpolate_env_vars;
use crate::inference::ModelConfig;
use crate::mcp_client::ServersConfig;

/// File name searched for when no path is given.
pub const CONFIG_FILE_NAME: &str = "mcp-agent.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MCP_AGENT_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not find {CONFIG_FILE_NAME} (set {CONFIG_PATH_ENV} or pass --config)")]
    NotFound,

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

/// The whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub servers: ServersConfig,
}

/// The `agent:` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub system_prompt: String,
    pub max_iterations: usize,
    /// Stored messages replayed as context on each turn.
    pub context_messages: usize,
    /// Reminder period used when the model does not pick one.
    pub reminder_interval_secs: u64,
    /// Per-call timeout for `tools/call`.
    pub call_timeout_secs: u64,
    /// Chat history database. Defaults to the data directory.
    pub database_path: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: MAX_ITERATIONS,
            context_messages: DEFAULT_CONTEXT_MESSAGES,
            reminder_interval_secs: DEFAULT_REMINDER_INTERVAL.as_secs(),
            call_timeout_secs: 60,
            database_path: None,
        }
    }
}

impl AgentSettings {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            system_prompt: self.system_prompt.clone(),
            max_iterations: self.max_iterations,
            context_messages: self.context_messages,
            reminder_interval: Duration::from_secs(self.reminder_interval_secs),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl AppConfig {
    /// Read, interpolate, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::parse(&raw).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        tracing::info!(
            path = %path.display(),
            model = %config.model.model,
            servers = config.servers.len(),
            "config loaded"
        );
        Ok(config)
    }

    /// Parse config text.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        // An empty file is a valid all-defaults config.
        let config: AppConfig = if interpolated.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                path: "<inline>".into(),
                reason: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate().map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.max_iterations must be at least 1".into(),
            });
        }
        if self.agent.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.call_timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Locate the config file.
///
/// `MCP_AGENT_CONFIG` wins when it names an existing file; otherwise search
/// upward from `start` for `mcp-agent.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(explicit);
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} does not name a file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    Err(ConfigError::NotFound)
}
