pub mod agent;
pub mod chat;
pub mod config_cmd;
pub mod gateway;

use stepwise_config::AppConfig;
use stepwise_gateway::AppState;

/// Load config and build the shared services, with a readable error.
pub(crate) fn load_state() -> Result<(AppConfig, AppState), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if config.default_provider != "ollama" && config.api_key_for(&config.default_provider).is_none() {
        eprintln!();
        eprintln!("  WARNING: no API key configured for '{}'.", config.default_provider);
        eprintln!("  Set STEPWISE_API_KEY (or DASHSCOPE_API_KEY / OPENAI_API_KEY), or add it to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
    }

    let state = AppState::from_config(&config)?;
    Ok((config, state))
}
