//! Configuration loading, validation, and management for Stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model provider ("ollama", "dashscope", "openai", ...)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Chat memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-conversation agent cache configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Built-in tool configuration
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Reference document retrieval
    #[serde(default)]
    pub retriever: RetrieverConfig,
}

fn default_provider() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "qwen2.5".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("gateway", &self.gateway)
            .field("registry", &self.registry)
            .field("tools", &self.tools)
            .field("retriever", &self.retriever)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

pub const DEFAULT_AGENT_SYSTEM_PROMPT: &str = "You are an all-capable AI assistant, aimed at solving any task presented by the user.\n\
You have various tools at your disposal that you can call upon to efficiently complete complex requests.";

pub const DEFAULT_NEXT_STEP_PROMPT: &str = "Based on user needs, proactively select the most appropriate tool or combination of tools.\n\
For complex tasks, you can break down the problem and use different tools step by step to solve it.\n\
After using each tool, clearly explain the execution results and suggest the next steps.\n\
If you want to stop the interaction at any point, use the `terminate` tool/function call.";

pub const DEFAULT_CHAT_SYSTEM_PROMPT: &str = "You are a programming expert and a patient mentor.\n\
Before answering, find out whether the user is interested in front-end, back-end, or full-stack development,\n\
and tailor your answers to the tools and frameworks they already know.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on think/act iterations per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_agent_system_prompt")]
    pub system_prompt: String,

    /// Appended as a user message before every think phase
    #[serde(default = "default_next_step_prompt")]
    pub next_step_prompt: String,

    /// Calling this tool finishes the run
    #[serde(default = "default_terminate_tool")]
    pub terminate_tool: String,

    /// System prompt for plain (tool-less) chat
    #[serde(default = "default_chat_system_prompt")]
    pub chat_system_prompt: String,

    /// Whether model calls pass through the re-reading advisor
    #[serde(default = "default_true")]
    pub re_reading: bool,
}

fn default_max_steps() -> u32 {
    20
}
fn default_agent_system_prompt() -> String {
    DEFAULT_AGENT_SYSTEM_PROMPT.into()
}
fn default_next_step_prompt() -> String {
    DEFAULT_NEXT_STEP_PROMPT.into()
}
fn default_terminate_tool() -> String {
    "terminate".into()
}
fn default_chat_system_prompt() -> String {
    DEFAULT_CHAT_SYSTEM_PROMPT.into()
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            system_prompt: default_agent_system_prompt(),
            next_step_prompt: default_next_step_prompt(),
            terminate_tool: default_terminate_tool(),
            chat_system_prompt: default_chat_system_prompt(),
            re_reading: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "in_memory", "file", or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Messages kept per conversation by the in-memory backend
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Directory for the file backend (defaults to ~/.stepwise/chat-memory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_memory_backend() -> String {
    "in_memory".into()
}
fn default_max_messages() -> usize {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            max_messages: default_max_messages(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Inactivity timeout for SSE streams
    #[serde(default = "default_sse_timeout_secs")]
    pub sse_timeout_secs: u64,
}

fn default_port() -> u16 {
    8123
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_sse_timeout_secs() -> u64 {
    180
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            sse_timeout_secs: default_sse_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum cached agents; the least recently used is evicted beyond this
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Agents idle longer than this are evicted
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_max_agents() -> usize {
    1000
}
fn default_idle_ttl_secs() -> u64 {
    3600
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root directory for file and download tools (defaults to ~/.stepwise/workspace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    /// Commands the shell tool may run. Empty = any command.
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,

    /// Key for the web search API (or `SEARCH_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_api_key: Option<String>,

    #[serde(default = "default_search_api_url")]
    pub search_api_url: String,
}

fn default_search_api_url() -> String {
    "https://www.searchapi.io/api/v1/search".into()
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("workspace_dir", &self.workspace_dir)
            .field("allowed_commands", &self.allowed_commands)
            .field("timeout_secs", &self.timeout_secs)
            .field("search_api_key", &redact(&self.search_api_key))
            .field("search_api_url", &self.search_api_url)
            .finish()
    }
}

fn default_tool_timeout_secs() -> u64 {
    180
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            allowed_commands: vec![
                "ls".into(),
                "cat".into(),
                "echo".into(),
                "grep".into(),
                "pwd".into(),
                "date".into(),
            ],
            timeout_secs: default_tool_timeout_secs(),
            search_api_key: None,
            search_api_url: default_search_api_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Directory of `.md`, `.txt` and `.json` reference files. Unset = no retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_dir: Option<PathBuf>,

    /// Most chunks added to a prompt
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Target chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive pieces of an oversized paragraph
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_max_results() -> usize {
    5
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            docs_dir: None,
            max_results: default_max_results(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml).
    ///
    /// Environment variables override the file:
    /// - `STEPWISE_API_KEY`, then `DASHSCOPE_API_KEY`, then `OPENAI_API_KEY`
    /// - `STEPWISE_PROVIDER`, `STEPWISE_MODEL`, `STEPWISE_PORT`
    /// - `OLLAMA_BASE_URL`, `SEARCH_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("STEPWISE_API_KEY")
                .or_else(|| lookup("DASHSCOPE_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("STEPWISE_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("STEPWISE_MODEL") {
            self.default_model = model;
        }

        if let Some(port) = lookup("STEPWISE_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid STEPWISE_PORT"),
            }
        }

        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.providers.entry("ollama".into()).or_default().api_url = Some(url);
        }

        if self.tools.search_api_key.is_none() {
            self.tools.search_api_key = lookup("SEARCH_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Directory the file and download tools are confined to.
    pub fn workspace_dir(&self) -> PathBuf {
        self.tools
            .workspace_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Directory the file chat memory writes to.
    pub fn memory_dir(&self) -> PathBuf {
        self.memory
            .dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("chat-memory"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.gateway.sse_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.sse_timeout_secs must be > 0".into(),
            ));
        }

        if self.memory.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_messages must be > 0".into(),
            ));
        }

        if self.retriever.chunk_overlap >= self.retriever.chunk_size {
            return Err(ConfigError::ValidationError(
                "retriever.chunk_overlap must be smaller than retriever.chunk_size".into(),
            ));
        }

        match self.memory.backend.as_str() {
            "in_memory" | "file" | "none" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown memory backend '{other}' (expected in_memory, file, or none)"
                )));
            }
        }

        Ok(())
    }

    /// The API key for a provider: its own key first, then the global one.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            gateway: GatewayConfig::default(),
            registry: RegistryConfig::default(),
            tools: ToolsConfig::default(),
            retriever: RetrieverConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
