//! File write tool: create or overwrite a file in the workspace.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolResult};

use crate::workspace::Workspace;

pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let full = self.workspace.resolve(path)?;
        self.workspace.ensure_dir("").await?;

        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: "file_write".into(),
            reason: e.to_string(),
        };
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        tokio::fs::write(&full, content).await.map_err(failed)?;

        Ok(ToolResult::ok(format!(
            "File written successfully to: {}",
            full.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition() {
        let tool = FileWriteTool::new(Workspace::new("/tmp"));
        let def = tool.to_definition();
        assert_eq!(def.name, "file_write");
        assert_eq!(def.parameters["required"][1], "content");
    }

    #[tokio::test]
    async fn writes_nested_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ws_root = tmp.path().join("ws");
        let tool = FileWriteTool::new(Workspace::new(&ws_root));

        let result = tool
            .execute(serde_json::json!({"path": "plans/today.md", "content": "- ship it"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("today.md"));
        assert_eq!(
            std::fs::read_to_string(ws_root.join("plans/today.md")).unwrap(),
            "- ship it"
        );
        assert!(ws_root.join(".gitignore").exists());
    }

    #[tokio::test]
    async fn absolute_path_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(Workspace::new(tmp.path()));
        let err = tool
            .execute(serde_json::json!({"path": "/tmp/evil", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
    }
}
