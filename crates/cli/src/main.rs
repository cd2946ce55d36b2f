//! Stepwise CLI: the main entry point.
//!
//! Commands:
//! - `agent`: Run the tool-using agent on one message
//! - `chat`: One chat turn without tools
//! - `gateway`: Start the HTTP API server
//! - `config`: Print, show, locate or validate configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise: tool-using agent engine with SSE streaming",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a single message
    Agent {
        /// The task for the agent
        #[arg(short, long)]
        message: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// Print each step as it happens
        #[arg(long)]
        stream: bool,
    },

    /// Send one chat message (no tools)
    Chat {
        #[arg(short, long)]
        message: String,

        /// Conversation whose history to use
        #[arg(short, long, default_value = "cli")]
        conversation: String,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long, env = "STEPWISE_PORT")]
        port: Option<u16>,
    },

    /// Configuration commands (prints the default config without a subcommand)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent {
            message,
            conversation,
            stream,
        } => commands::agent::run(message, conversation, stream).await?,
        Commands::Chat {
            message,
            conversation,
        } => commands::chat::run(message, conversation).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Config { action } => match action {
            None => commands::config_cmd::print_default(),
            Some(ConfigAction::Show) => commands::config_cmd::show()?,
            Some(ConfigAction::Path) => commands::config_cmd::path(),
            Some(ConfigAction::Validate) => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_agent_stream_flag() {
        let cli = Cli::try_parse_from(["stepwise", "agent", "-m", "list files", "--stream"]).unwrap();
        match cli.command {
            Commands::Agent { message, stream, conversation } => {
                assert_eq!(message, "list files");
                assert!(stream);
                assert!(conversation.is_none());
            }
            _ => panic!("expected agent command"),
        }
    }

    #[test]
    fn config_without_action_is_allowed() {
        let cli = Cli::try_parse_from(["stepwise", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { action: None }));
    }
}
