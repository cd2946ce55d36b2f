//! `stepwise config`: Configuration commands.

use stepwise_config::AppConfig;

/// Print a complete config file with every default filled in.
pub fn print_default() {
    println!("{}", AppConfig::default_toml());
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if config.default_provider != "ollama" && config.api_key_for(&config.default_provider).is_none() {
                warnings.push(format!("No API key set for provider '{}'", config.default_provider));
            }
            if config.tools.allowed_commands.is_empty() {
                warnings.push("Shell tool allowlist is empty: any command may run".to_string());
            }
            if config.gateway.host == "0.0.0.0" {
                warnings.push("Gateway is bound to all interfaces".to_string());
            }
            for w in &warnings {
                println!("   warning: {w}");
            }

            println!();
            println!("   Provider:  {}", config.default_provider);
            println!("   Model:     {}", config.default_model);
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            println!("   Memory:    {}", config.memory.backend);
            println!("   Max steps: {}", config.agent.max_steps);
            println!("   Workspace: {}", config.workspace_dir().display());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Print the effective configuration (file plus environment overrides).
pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = stepwise_config::AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_toml_parses_back() {
        let text = stepwise_config::AppConfig::default_toml();
        let parsed: stepwise_config::AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.agent.max_steps, 20);
    }
}
