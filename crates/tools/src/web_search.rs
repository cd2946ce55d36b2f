//! Web search tool backed by a SearchApi-compatible endpoint.
//!
//! Sends `q`, `api_key` and `engine=google` as query parameters and returns
//! the top organic results as pretty-printed JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolResult};
use tracing::debug;

pub const DEFAULT_SEARCH_API_URL: &str = "https://www.searchapi.io/api/v1/search";

const DEFAULT_RESULTS: u64 = 5;
const MAX_RESULTS: u64 = 10;

pub struct WebSearchTool {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: DEFAULT_SEARCH_API_URL.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Pick the first `limit` organic results out of a search response body.
pub fn parse_results(body: &str, limit: usize) -> Result<Vec<SearchResult>, serde_json::Error> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .organic_results
        .into_iter()
        .take(limit)
        .map(|r| SearchResult {
            title: r.title,
            url: r.link,
            snippet: r.snippet,
        })
        .collect())
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns the top results with titles, URLs, and snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query keywords"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 5, at most 10)",
                    "default": DEFAULT_RESULTS
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let limit = arguments["num_results"]
            .as_u64()
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS) as usize;

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| failed("Search API key is not configured".into()))?;

        debug!(query = %query, limit, "Searching the web");
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("q", query), ("api_key", api_key), ("engine", "google")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let body = response.text().await.map_err(|e| failed(e.to_string()))?;

        let results = parse_results(&body, limit).map_err(|e| failed(format!("Malformed search response: {e}")))?;
        let output = serde_json::to_string_pretty(&results).map_err(|e| failed(e.to_string()))?;
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output,
            data: serde_json::to_value(&results).ok(),
        })
    }
}
