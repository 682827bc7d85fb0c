//! Launchwatch - token launch monitoring and qualification pipeline
//!
//! Watches for newly listed tokens, scores each across a fixed evaluation
//! window, finalizes an accept/reject decision at expiry, and grades its own
//! predictions against realized market outcomes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use launchwatch::cli::commands;
use launchwatch::config::Config;

/// Token launch monitoring and qualification pipeline
#[derive(Parser)]
#[command(name = "launchwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring pipeline until interrupted
    Run {
        /// Use an empty in-memory source instead of the live feed
        #[arg(long)]
        offline: bool,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Run one detection and analysis pass, then exit
    Scan {
        /// Use an empty in-memory source instead of the live feed
        #[arg(long)]
        offline: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("launchwatch=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { offline, duration } => commands::run(&config, offline, duration).await,
        Commands::Scan { offline } => commands::scan(&config, offline).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
