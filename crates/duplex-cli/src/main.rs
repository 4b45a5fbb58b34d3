//! Duplex CLI: entry point.
//!
//! # Commands
//!
//! - `duplex chat [--system-prompt TEXT] [--no-reconnect] [--logs]`: live conversation
//! - `duplex init`: write the default config
//! - `duplex status`: show configuration

mod chat;
mod helpers;
mod init;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Duplex: bidirectional streaming agent
#[derive(Parser)]
#[command(name = "duplex", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a live conversation with the agent
    Chat {
        /// System prompt (overrides the config file)
        #[arg(short, long)]
        system_prompt: Option<String>,

        /// Do not reconnect after transport failures
        #[arg(long, default_value_t = false)]
        no_reconnect: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Write the default configuration
    Init,

    /// Show configuration
    Status,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            system_prompt,
            no_reconnect,
            logs,
        } => {
            init_logging(logs);
            chat::run(system_prompt, no_reconnect).await
        }
        Commands::Init => init::run(),
        Commands::Status => status::run(),
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("duplex=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
