//! Hearthclaw CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the inbound HTTP endpoint and the pipeline workers
//! - `ask`    — Send a single message and print the reply
//! - `doctor` — Diagnose provider and plugin health

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "hearthclaw",
    about = "Hearthclaw — personal assistant backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "hearthclaw.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the inbound HTTP server and pipeline workers
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send a single message and print the reply
    Ask {
        /// The message text
        message: String,

        /// User id the message is attributed to
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Diagnose provider and plugin health
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(&cli.config, port).await?,
        Commands::Ask { message, user } => commands::ask::run(&cli.config, message, user).await?,
        Commands::Doctor => commands::doctor::run(&cli.config).await?,
    }

    Ok(())
}
