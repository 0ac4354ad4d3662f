//! NewsAPI v2 tools: `search_news`, `get_top_headlines`, `get_sources`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::dispatcher::{opt_f64, opt_str, req_str, Arguments, ToolError, ToolHandler};
use super::reminder::SnapshotSource;
use super::{env_key, fetch_json, upstream_client};
use crate::mcp_client::types::McpToolDefinition;

pub const NEWS_API_BASE: &str = "https://newsapi.org/v2";

/// Environment variable holding the NewsAPI key.
pub const NEWS_API_KEY_VAR: &str = "NEWS_API_KEY";

const MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 20;

/// Articles per country in a reminder snapshot.
const SNAPSHOT_PAGE_SIZE: u64 = 10;

// ─── NewsApi ────────────────────────────────────────────────────────────────

pub struct NewsApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl NewsApi {
    pub fn new(api_key: Option<String>) -> Result<Self, ToolError> {
        Ok(Self {
            http: upstream_client()?,
            base_url: NEWS_API_BASE.to_string(),
            api_key,
        })
    }

    /// Key from `NEWS_API_KEY`. Without one, every call fails with a clear error.
    pub fn from_env() -> Result<Self, ToolError> {
        Self::new(env_key(NEWS_API_KEY_VAR))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, endpoint: &str, mut query: Vec<(&str, String)>) -> Result<Value, ToolError> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ToolError::upstream(format!("{NEWS_API_KEY_VAR} is not set")))?;
        query.push(("apiKey", key.clone()));

        let url = format!("{}/{endpoint}", self.base_url);
        let body = fetch_json(&self.http, &url, &query).await?;

        // NewsAPI reports some failures as 200 with status "error".
        if body.get("status").and_then(Value::as_str) == Some("error") {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown NewsAPI error");
            return Err(ToolError::upstream(message.to_string()));
        }
        Ok(body)
    }

    pub async fn search_news(&self, arguments: &Arguments) -> Result<Value, ToolError> {
        self.get("everything", search_query(arguments)?).await
    }

    pub async fn top_headlines(&self, arguments: &Arguments) -> Result<Value, ToolError> {
        self.get("top-headlines", headlines_query(arguments)?).await
    }

    pub async fn sources(&self, arguments: &Arguments) -> Result<Value, ToolError> {
        self.get("top-headlines/sources", sources_query(arguments)).await
    }
}

#[async_trait]
impl SnapshotSource for NewsApi {
    async fn headlines(&self, country: &str) -> Result<Value, ToolError> {
        let query = vec![
            ("country", country.to_string()),
            ("pageSize", SNAPSHOT_PAGE_SIZE.to_string()),
        ];
        let mut body = self.get("top-headlines", query).await?;
        drop_removed_articles(&mut body);
        Ok(body)
    }
}

/// NewsAPI keeps placeholders for withdrawn articles titled "[Removed]".
pub fn drop_removed_articles(body: &mut Value) {
    if let Some(articles) = body.get_mut("articles").and_then(Value::as_array_mut) {
        articles.retain(|article| {
            article
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(|title| !title.to_lowercase().contains("removed"))
        });
    }
}

// ─── Query Building ─────────────────────────────────────────────────────────

fn paging(arguments: &Arguments, query: &mut Vec<(&'static str, String)>) -> Result<(), ToolError> {
    let page = opt_f64(arguments, "page")?.map_or(1, |p| p.max(1.0) as u64);
    let page_size = opt_f64(arguments, "pageSize")?
        .map_or(DEFAULT_PAGE_SIZE, |s| (s.max(1.0) as u64).min(MAX_PAGE_SIZE));
    query.push(("page", page.to_string()));
    query.push(("pageSize", page_size.to_string()));
    Ok(())
}

fn push_opt(arguments: &Arguments, name: &'static str, query: &mut Vec<(&'static str, String)>) {
    if let Some(value) = opt_str(arguments, name) {
        query.push((name, value.to_string()));
    }
}

pub fn search_query(arguments: &Arguments) -> Result<Vec<(&'static str, String)>, ToolError> {
    let mut query = vec![("q", req_str(arguments, "q")?.to_string())];
    query.push((
        "sortBy",
        opt_str(arguments, "sortBy").unwrap_or("popularity").to_string(),
    ));
    for name in ["from", "to", "language"] {
        push_opt(arguments, name, &mut query);
    }
    paging(arguments, &mut query)?;
    Ok(query)
}

pub fn headlines_query(arguments: &Arguments) -> Result<Vec<(&'static str, String)>, ToolError> {
    if ["country", "category", "sources"]
        .iter()
        .all(|name| opt_str(arguments, name).is_none())
    {
        return Err(ToolError::InvalidArgument {
            name: "country".into(),
            reason: "at least one of country, category or sources is required".into(),
        });
    }
    let mut query = Vec::new();
    for name in ["country", "category", "sources", "q"] {
        push_opt(arguments, name, &mut query);
    }
    paging(arguments, &mut query)?;
    Ok(query)
}

pub fn sources_query(arguments: &Arguments) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    for name in ["category", "language", "country"] {
        push_opt(arguments, name, &mut query);
    }
    query
}

// ─── Tool Handlers ──────────────────────────────────────────────────────────

const CATEGORIES: &[&str] = &[
    "business",
    "entertainment",
    "general",
    "health",
    "science",
    "sports",
    "technology",
];

struct SearchNews(Arc<NewsApi>);
struct TopHeadlines(Arc<NewsApi>);
struct Sources(Arc<NewsApi>);

/// The three NewsAPI tools over one shared client.
pub fn tools(api: Arc<NewsApi>) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(SearchNews(Arc::clone(&api))) as Arc<dyn ToolHandler>,
        Arc::new(TopHeadlines(Arc::clone(&api))) as Arc<dyn ToolHandler>,
        Arc::new(Sources(api)) as Arc<dyn ToolHandler>,
    ]
}

fn to_text(value: &Value) -> Result<String, ToolError> {
    serde_json::to_string(value).map_err(|e| ToolError::upstream(e.to_string()))
}

#[async_trait]
impl ToolHandler for SearchNews {
    fn descriptor(&self) -> McpToolDefinition {
        McpToolDefinition {
            name: "search_news".into(),
            description: Some(
                "Search news articles by keywords or phrase across more than 150,000 sources \
                 published in the last five years."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "q": {"type": "string", "description": "Keywords or phrase, e.g. \"Apple\" or \"climate policy\""},
                    "from": {"type": "string", "description": "Oldest article date, YYYY-MM-DD"},
                    "to": {"type": "string", "description": "Newest article date, YYYY-MM-DD"},
                    "sortBy": {"type": "string", "enum": ["relevancy", "popularity", "publishedAt"]},
                    "language": {"type": "string", "description": "Two-letter language code, e.g. \"en\""},
                    "page": {"type": "integer", "minimum": 1},
                    "pageSize": {"type": "integer", "minimum": 1, "maximum": 100}
                },
                "required": ["q"]
            }),
        }
    }

    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError> {
        to_text(&self.0.search_news(arguments).await?)
    }
}

#[async_trait]
impl ToolHandler for TopHeadlines {
    fn descriptor(&self) -> McpToolDefinition {
        McpToolDefinition {
            name: "get_top_headlines".into(),
            description: Some(
                "Live top headlines for a country, category or source. At least one of \
                 country, category or sources is required."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "country": {"type": "string", "description": "Two-letter country code, e.g. \"us\" or \"gb\""},
                    "category": {"type": "string", "enum": CATEGORIES},
                    "sources": {"type": "string", "description": "Comma-separated source ids, e.g. \"bbc-news\""},
                    "q": {"type": "string", "description": "Keywords to filter headlines"},
                    "page": {"type": "integer", "minimum": 1},
                    "pageSize": {"type": "integer", "minimum": 1, "maximum": 100}
                }
            }),
        }
    }

    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError> {
        to_text(&self.0.top_headlines(arguments).await?)
    }
}

#[async_trait]
impl ToolHandler for Sources {
    fn descriptor(&self) -> McpToolDefinition {
        McpToolDefinition {
            name: "get_sources".into(),
            description: Some(
                "List available news sources, optionally filtered by category, language or country."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string", "enum": CATEGORIES},
                    "language": {"type": "string"},
                    "country": {"type": "string"}
                }
            }),
        }
    }

    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError> {
        to_text(&self.0.sources(arguments).await?)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
