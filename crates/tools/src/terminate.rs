//! Terminate tool: the model calls it to end an agent run.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolResult};

pub const TERMINATE_TOOL_NAME: &str = "terminate";

/// Signals that the task is complete. The agent finishes its run after a
/// step in which this tool was executed.
pub struct TerminateTool {
    name: String,
}

impl TerminateTool {
    pub fn new() -> Self {
        Self::named(TERMINATE_TOOL_NAME)
    }

    /// Register the tool under a different name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for TerminateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Terminate the interaction when the request is met or if the assistant cannot proceed further with the task. \
         Call this tool when all tasks are completed to end the session."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok("Task completed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_task_completed() {
        let tool = TerminateTool::new();
        assert_eq!(tool.name(), "terminate");
        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Task completed");
    }

    #[test]
    fn custom_name() {
        assert_eq!(TerminateTool::named("TerminateTool").name(), "TerminateTool");
    }
}
