//! Wayfare Chat - headless driver for conversation sessions.
//!
//! Opens a conversation session against the in-process gateway so the sync
//! layer can be exercised from a terminal, and manages its configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// Wayfare Chat - conversation sync driver
#[derive(Parser)]
#[command(name = "wayfare-chat")]
#[command(about = "Headless driver for Wayfare conversation sessions", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat in a demo conversation from stdin
    Chat {
        /// Conversation id
        #[arg(short, long, default_value = "demo")]
        conversation: String,

        /// Local user id
        #[arg(short, long, default_value = "traveler")]
        user: String,

        /// Configuration file path
        #[arg(long)]
        config: Option<String>,
    },

    /// Show or modify configuration
    Config {
        /// Key to get or set
        key: Option<String>,
        /// Value to set
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            conversation,
            user,
            config,
        } => commands::chat::execute(conversation, user, config).await,
        Commands::Config { key, value } => commands::config::execute(key, value).await,
    }
}
