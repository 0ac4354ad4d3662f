//! The `reminder` tool: a periodic multi-country headline collector.
//!
//! While running, the service takes a snapshot right away and then once per
//! interval: three countries picked at random from a fixed list, one
//! top-headlines query each. Snapshots go into a ring buffer of the last
//! [`MAX_SNAPSHOTS`]; older ones are dropped, never edited.
//!
//! `get` returns the newest snapshot plus a short pointer to the one before
//! it, so a summarizer can say what changed.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::dispatcher::{opt_f64, req_str, Arguments, ToolError, ToolHandler};
use crate::mcp_client::types::McpToolDefinition;

pub const COUNTRIES: [&str; 10] = ["us", "ru", "gb", "de", "fr", "jp", "cn", "in", "br", "au"];
pub const COUNTRIES_PER_SNAPSHOT: usize = 3;
pub const MAX_SNAPSHOTS: usize = 10;
pub const DEFAULT_INTERVAL_SECS: u64 = 40;

pub const NO_DATA_TEXT: &str = "No reminder data collected yet.";
pub const NOT_RUNNING_TEXT: &str = "Reminder is not running";

// ─── Source ─────────────────────────────────────────────────────────────────

/// Where snapshot data comes from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Top headlines for one country code.
    async fn headlines(&self, country: &str) -> Result<Value, ToolError>;
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ReminderSnapshot {
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<String>,
    pub results_by_source: BTreeMap<String, Value>,
}

impl ReminderSnapshot {
    pub fn article_count(&self) -> usize {
        self.results_by_source
            .values()
            .filter_map(|r| r.get("articles").and_then(Value::as_array))
            .map(Vec::len)
            .sum()
    }
}

type SnapshotRing = Arc<Mutex<VecDeque<ReminderSnapshot>>>;

// ─── ReminderService ────────────────────────────────────────────────────────

pub struct ReminderService {
    source: Arc<dyn SnapshotSource>,
    snapshots: SnapshotRing,
    task: Mutex<Option<(JoinHandle<()>, Duration)>>,
}

impl ReminderService {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            snapshots: Arc::new(Mutex::new(VecDeque::new())),
            task: Mutex::new(None),
        }
    }

    /// Start collecting every `interval`. Returns `false` if already running.
    pub fn start(&self, interval: Duration) -> bool {
        let Ok(mut slot) = self.task.lock() else {
            return false;
        };
        if slot.as_ref().is_some_and(|(h, _)| !h.is_finished()) {
            return false;
        }

        let interval = interval.max(Duration::from_secs(1));
        let source = Arc::clone(&self.source);
        let snapshots = Arc::clone(&self.snapshots);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = collect(source.as_ref()).await;
                push_snapshot(&snapshots, snapshot);
            }
        });
        *slot = Some((handle, interval));
        tracing::info!(interval_secs = interval.as_secs(), "reminder started");
        true
    }

    /// Stop collecting. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        let taken = self.task.lock().ok().and_then(|mut slot| slot.take());
        match taken {
            Some((handle, _)) => {
                handle.abort();
                tracing::info!("reminder stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval().is_some()
    }

    fn interval(&self) -> Option<Duration> {
        self.task.lock().ok().and_then(|slot| {
            slot.as_ref()
                .filter(|(h, _)| !h.is_finished())
                .map(|(_, interval)| *interval)
        })
    }

    /// Take one snapshot now, outside the schedule.
    pub async fn collect_now(&self) -> ReminderSnapshot {
        let snapshot = collect(self.source.as_ref()).await;
        push_snapshot(&self.snapshots, snapshot.clone());
        snapshot
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Newest snapshot with a pointer to the previous one.
    pub fn latest_json(&self) -> Option<Value> {
        let snapshots = self.snapshots.lock().ok()?;
        let latest = snapshots.back()?;
        let mut body = json!({
            "timestamp": latest.timestamp.to_rfc3339(),
            "countries": latest.sources,
            "news": latest.results_by_source,
        });
        if snapshots.len() > 1 {
            let previous = &snapshots[snapshots.len() - 2];
            body["previousContext"] = json!({
                "timestamp": previous.timestamp.to_rfc3339(),
                "countries": previous.sources,
            });
        }
        Some(body)
    }

    pub fn status_json(&self) -> Value {
        let last_update = self
            .snapshots
            .lock()
            .ok()
            .and_then(|s| s.back().map(|snap| snap.timestamp.to_rfc3339()));
        json!({
            "running": self.is_running(),
            "intervalSeconds": self.interval().map(|i| i.as_secs()),
            "snapshots": self.snapshot_count(),
            "lastUpdate": last_update,
        })
    }
}

impl Drop for ReminderService {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some((handle, _)) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn pick_countries() -> Vec<String> {
    COUNTRIES
        .choose_multiple(&mut rand::thread_rng(), COUNTRIES_PER_SNAPSHOT)
        .map(|c| c.to_string())
        .collect()
}

/// Query every picked country; a failed country is recorded, not fatal.
async fn collect(source: &dyn SnapshotSource) -> ReminderSnapshot {
    let countries = pick_countries();
    let results = join_all(countries.iter().map(|c| source.headlines(c))).await;

    let results_by_source = countries
        .iter()
        .zip(results)
        .map(|(country, result)| {
            let value = result.unwrap_or_else(|e| {
                tracing::warn!(country = %country, error = %e, "headline fetch failed");
                json!({ "status": "error", "message": e.to_string(), "articles": [] })
            });
            (country.clone(), value)
        })
        .collect();

    let snapshot = ReminderSnapshot {
        timestamp: Utc::now(),
        sources: countries,
        results_by_source,
    };
    tracing::info!(
        countries = %snapshot.sources.join(","),
        articles = snapshot.article_count(),
        "reminder snapshot collected"
    );
    snapshot
}

fn push_snapshot(ring: &SnapshotRing, snapshot: ReminderSnapshot) {
    if let Ok(mut snapshots) = ring.lock() {
        snapshots.push_back(snapshot);
        while snapshots.len() > MAX_SNAPSHOTS {
            snapshots.pop_front();
        }
    }
}

// ─── Tool Handler ───────────────────────────────────────────────────────────

pub struct ReminderTool {
    service: Arc<ReminderService>,
}

impl ReminderTool {
    pub fn new(service: Arc<ReminderService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ToolHandler for ReminderTool {
    fn descriptor(&self) -> McpToolDefinition {
        McpToolDefinition {
            name: "reminder".into(),
            description: Some(format!(
                "Periodic news digest. \"start\" begins collecting top headlines from \
                 {COUNTRIES_PER_SNAPSHOT} random countries every intervalSeconds (default \
                 {DEFAULT_INTERVAL_SECS}); \"get\" returns the latest collection; \"status\" \
                 reports whether it runs; \"stop\" ends it."
            )),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["start", "stop", "get", "status"]},
                    "intervalSeconds": {"type": "integer", "minimum": 1}
                },
                "required": ["action"]
            }),
        }
    }

    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError> {
        let action = req_str(arguments, "action")?.to_lowercase();
        match action.as_str() {
            "start" => {
                let secs = opt_f64(arguments, "intervalSeconds")?
                    .filter(|s| *s >= 1.0)
                    .map_or(DEFAULT_INTERVAL_SECS, |s| s as u64);
                if self.service.start(Duration::from_secs(secs)) {
                    Ok(format!(
                        "Reminder started: collecting news every {secs} seconds."
                    ))
                } else {
                    Ok("Reminder is already running.".to_string())
                }
            }
            "stop" => Ok(if self.service.stop() {
                "Reminder stopped.".to_string()
            } else {
                "Reminder was not running.".to_string()
            }),
            "get" => match self.service.latest_json() {
                Some(body) => {
                    serde_json::to_string(&body).map_err(|e| ToolError::upstream(e.to_string()))
                }
                None if self.service.is_running() => Ok(NO_DATA_TEXT.to_string()),
                None => Err(ToolError::upstream(NOT_RUNNING_TEXT)),
            },
            "status" => Ok(self.service.status_json().to_string()),
            other => Err(ToolError::InvalidArgument {
                name: "action".into(),
                reason: format!("unknown action '{other}', expected start, stop, get or status"),
            }),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
