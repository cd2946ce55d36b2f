//! Resource download tool: save a remote file into the workspace.

use std::time::Duration;

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolResult};
use tracing::debug;

use crate::workspace::Workspace;

pub const DOWNLOAD_DIR: &str = "download";

pub struct ResourceDownloadTool {
    client: reqwest::Client,
    workspace: Workspace,
    timeout: Duration,
}

impl ResourceDownloadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            client: reqwest::Client::new(),
            workspace,
            timeout: Duration::from_secs(180),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A download target must be a bare file name.
fn validate_file_name(name: &str) -> Result<&str, ToolError> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ToolError::InvalidArguments(format!(
            "Invalid file name '{name}'"
        )));
    }
    Ok(name)
}

#[async_trait]
impl Tool for ResourceDownloadTool {
    fn name(&self) -> &str {
        "resource_download"
    }

    fn description(&self) -> &str {
        "Download a resource from a URL and save it into the workspace download directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL of the resource to download"
                },
                "file_name": {
                    "type": "string",
                    "description": "Name to save the downloaded resource under"
                }
            },
            "required": ["url", "file_name"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;
        let file_name = arguments["file_name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_name' argument".into()))?;
        let file_name = validate_file_name(file_name)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "Unsupported URL '{url}', expected http or https"
            )));
        }

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "resource_download".into(),
            reason,
        };

        let dir = self.workspace.ensure_dir(DOWNLOAD_DIR).await?;
        let target = dir.join(file_name);
        debug!(url = %url, target = %target.display(), "Downloading resource");

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
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| failed(e.to_string()))?;

        Ok(ToolResult::ok(format!(
            "Resource downloaded successfully to: {}",
            target.display()
        )))
    }
}
