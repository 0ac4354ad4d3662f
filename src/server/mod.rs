//! Tool server — the peer side of the protocol.
//!
//! A [`Dispatcher`] answers `initialize`, `tools/list` and `tools/call` for a
//! set of [`ToolHandler`]s, served over stdio lines or HTTP POST. The tools
//! themselves wrap NewsAPI, OpenWeatherMap, and the periodic news reminder.

pub mod dispatcher;
pub mod http;
pub mod news;
pub mod reminder;
pub mod stdio;
pub mod weather;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub use dispatcher::{Arguments, Dispatcher, ToolError, ToolHandler};
pub use http::{router, serve_http, serve_listener};
pub use news::NewsApi;
pub use reminder::{ReminderService, ReminderTool, SnapshotSource};
pub use stdio::serve_stdio;
pub use weather::WeatherApi;

/// Name announced in `initialize`.
pub const SERVER_NAME: &str = "mcp-tool-server";

/// Timeout for calls to the REST services behind the tools.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("mcp-tool-server/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by the REST-backed tools.
pub(crate) fn upstream_client() -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(UPSTREAM_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ToolError::upstream(format!("failed to build HTTP client: {e}")))
}

/// GET `url` with `query` and parse the JSON body.
///
/// Non-2xx replies become `Upstream` errors carrying the service's own
/// `message` field when it has one.
pub(crate) async fn fetch_json(
    http: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<Value, ToolError> {
    let started = std::time::Instant::now();
    let response = http
        .get(url)
        .query(query)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| ToolError::upstream(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ToolError::upstream(format!("failed to read response from {url}: {e}")))?;
    tracing::debug!(
        url,
        status = status.as_u16(),
        bytes = body.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "upstream response"
    );

    let json: Option<Value> = serde_json::from_str(&body).ok();
    if !status.is_success() {
        let message = json
            .as_ref()
            .and_then(|j| j.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(body);
        return Err(ToolError::upstream(format!("HTTP {}: {message}", status.as_u16())));
    }
    json.ok_or_else(|| ToolError::upstream(format!("invalid JSON from {url}")))
}

/// Read an API key from the environment, treating blank values as unset.
pub(crate) fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// A group of tools the server can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSet {
    News,
    Weather,
    Reminder,
}

impl ToolSet {
    pub const ALL: [ToolSet; 3] = [ToolSet::News, ToolSet::Weather, ToolSet::Reminder];
}

impl FromStr for ToolSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Ok(ToolSet::News),
            "weather" => Ok(ToolSet::Weather),
            "reminder" => Ok(ToolSet::Reminder),
            other => Err(format!("unknown tool set '{other}' (expected news, weather or reminder)")),
        }
    }
}

/// Build a dispatcher serving `sets`, with API keys from the environment.
///
/// A missing key is not fatal here; the affected tools report it per call.
pub fn build_dispatcher(sets: &[ToolSet]) -> Result<Dispatcher, ToolError> {
    let mut dispatcher = Dispatcher::new(SERVER_NAME, env!("CARGO_PKG_VERSION"));
    let needs_news = sets.iter().any(|s| matches!(s, ToolSet::News | ToolSet::Reminder));
    let news = if needs_news {
        Some(Arc::new(NewsApi::from_env()?))
    } else {
        None
    };

    for set in sets {
        match (set, &news) {
            (ToolSet::News, Some(api)) => {
                for handler in news::tools(Arc::clone(api)) {
                    dispatcher.register(handler);
                }
            }
            (ToolSet::Reminder, Some(api)) => {
                let service = Arc::new(ReminderService::new(Arc::clone(api) as Arc<dyn SnapshotSource>));
                dispatcher.register(Arc::new(reminder::ReminderTool::new(service)));
            }
            (ToolSet::Weather, _) => {
                for handler in weather::tools(Arc::new(WeatherApi::from_env()?)) {
                    dispatcher.register(handler);
                }
            }
            _ => {}
        }
    }
    Ok(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_set_parsing() {
        assert_eq!("News".parse::<ToolSet>(), Ok(ToolSet::News));
        assert_eq!(" reminder ".parse::<ToolSet>(), Ok(ToolSet::Reminder));
        assert!("stocks".parse::<ToolSet>().is_err());
    }

    #[tokio::test]
    async fn test_build_dispatcher_registers_selected_tools() {
        let dispatcher = build_dispatcher(&[ToolSet::Reminder]).unwrap();
        assert_eq!(dispatcher.tool_names(), vec!["reminder"]);

        let all = build_dispatcher(&ToolSet::ALL).unwrap();
        let names = all.tool_names();
        assert!(names.contains(&"reminder"));
        assert!(names.contains(&"search_news"));
        assert!(names.contains(&"get_current_weather_by_city"));
        assert_eq!(names.len(), 7);
    }
}
