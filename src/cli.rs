//! CLI interface for earshot-server.

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "earshot-server")]
#[command(about = "Real-time conversational-awareness audio pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (control API + client audio WebSocket)
    Serve {
        /// Path to the configuration file (defaults to the platform config dir)
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Print the resolved configuration and exit
    ShowConfig {
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Reset the configuration file to defaults
    ResetConfig {
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { config: None }) {
        Commands::Serve { config } => {
            let config_path = resolve_config_path(config)?;
            let config = crate::config::Config::load(&config_path)?;
            crate::server::run(config, config_path).await
        }
        Commands::ShowConfig { config } => {
            let config_path = resolve_config_path(config)?;
            let config = crate::config::Config::load(&config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ResetConfig { config } => {
            let config_path = resolve_config_path(config)?;
            let config = crate::config::Config::default();
            config.save(&config_path)?;
            println!("Configuration reset to defaults at {}", config_path.display());
            Ok(())
        }
    }
}

fn resolve_config_path(explicit: Option<std::path::PathBuf>) -> Result<std::path::PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => crate::config::default_config_path(),
    }
}
