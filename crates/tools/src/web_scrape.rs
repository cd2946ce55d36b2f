//! Web scrape tool: fetch a page and reduce it to readable text.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolResult};
use tracing::debug;

/// Elements whose text never reaches the model.
const NOISE_SELECTOR: &str = "footer, header, iframe, nav, noscript, script, style";

const MAX_TEXT_CHARS: usize = 20_000;

pub struct WebScrapeTool {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebScrapeTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for WebScrapeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebScrapeTool {
    fn name(&self) -> &str {
        "web_scrape"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its main text content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL of the web page to scrape (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "Unsupported URL '{url}', expected http or https"
            )));
        }

        debug!(url = %url, "Scraping web page");
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_scrape".into(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let html = response.text().await.map_err(|e| failed(e.to_string()))?;

        Ok(ToolResult::ok(extract_text(&html, MAX_TEXT_CHARS)))
    }
}

/// Reduce a page to the text of its `<body>`, skipping noise elements and
/// collapsing whitespace. Output is capped at `max_chars` characters.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());

    let noise: HashSet<_> = Selector::parse(NOISE_SELECTOR)
        .ok()
        .map(|s| body.select(&s).map(|el| el.id()).collect())
        .unwrap_or_default();

    let mut words = Vec::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if node.ancestors().any(|a| noise.contains(&a.id())) {
            continue;
        }
        words.extend(text.split_whitespace());
    }

    let collapsed = words.join(" ");
    if collapsed.chars().count() > max_chars {
        collapsed.chars().take(max_chars).collect::<String>() + "..."
    } else {
        collapsed
    }
}
