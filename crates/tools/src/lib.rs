//! Built-in tool implementations for Stepwise.
//!
//! Tools give the agent the ability to interact with the world: read and
//! write files, run allowlisted shell commands, search the web, scrape web
//! pages and download resources. Everything that touches the disk is confined to a
//! single workspace directory.

pub mod file_read;
pub mod file_write;
pub mod resource_download;
pub mod shell;
pub mod terminate;
pub mod web_scrape;
pub mod web_search;
pub mod workspace;

use std::path::PathBuf;
use std::time::Duration;

use stepwise_config::{AgentConfig, ToolsConfig};
use stepwise_core::tool::ToolRegistry;

pub use terminate::{TERMINATE_TOOL_NAME, TerminateTool};
pub use workspace::Workspace;

/// Create the default tool registry with all built-in tools.
///
/// The terminate tool is registered under the name the agent watches for.
pub fn default_registry(
    workspace_dir: PathBuf,
    tools: &ToolsConfig,
    agent: &AgentConfig,
) -> ToolRegistry {
    let workspace = Workspace::new(workspace_dir);
    let timeout = Duration::from_secs(tools.timeout_secs);

    ToolRegistry::new()
        .with_tool(Box::new(TerminateTool::named(agent.terminate_tool.clone())))
        .with_tool(Box::new(file_read::FileReadTool::new(workspace.clone())))
        .with_tool(Box::new(file_write::FileWriteTool::new(workspace.clone())))
        .with_tool(Box::new(
            shell::ShellTool::new(tools.allowed_commands.clone(), workspace.clone())
                .with_timeout(timeout),
        ))
        .with_tool(Box::new(
            web_search::WebSearchTool::new(tools.search_api_key.clone())
                .with_api_url(tools.search_api_url.clone())
                .with_timeout(timeout),
        ))
        .with_tool(Box::new(web_scrape::WebScrapeTool::new()))
        .with_tool(Box::new(
            resource_download::ResourceDownloadTool::new(workspace).with_timeout(timeout),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_builtins() {
        let registry = default_registry(
            PathBuf::from("/tmp/stepwise-ws"),
            &ToolsConfig::default(),
            &AgentConfig::default(),
        );
        assert_eq!(
            registry.names(),
            vec![
                "file_read",
                "file_write",
                "resource_download",
                "shell",
                "terminate",
                "web_scrape",
                "web_search"
            ]
        );
    }

    #[test]
    fn terminate_follows_agent_config() {
        let agent = AgentConfig {
            terminate_tool: "done".into(),
            ..AgentConfig::default()
        };
        let registry = default_registry(PathBuf::from("/tmp"), &ToolsConfig::default(), &agent);
        assert!(registry.get("done").is_some());
        assert!(registry.get("terminate").is_none());
    }
}
