//! Switchboard CLI - the main entry point.
//!
//! Commands:
//! - `onboard`   - Write a default config
//! - `serve`     - Start the HTTP gateway
//! - `models`    - Show configured models and the routing table
//! - `account`   - Show a user's credit balance
//! - `grant`     - Add (or remove) credits
//! - `unlimited` - Toggle unlimited usage for a user
//! - `usage`     - Show a user's monthly usage
//! - `pricing`   - List model pricing

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard: routed, credit-metered LLM chat service",
    version,
    author
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
    /// Create ~/.switchboard and a default config.toml
    Onboard,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configured models and the routing table
    Models,

    /// Show a user's credit balance
    Account { user: String },

    /// Add credits to a user's balance (negative to remove)
    Grant {
        user: String,
        #[arg(allow_hyphen_values = true)]
        credits: i64,
    },

    /// Let a user chat without spending credits
    Unlimited {
        user: String,
        /// Revoke unlimited usage instead
        #[arg(long)]
        off: bool,
    },

    /// Show a user's monthly usage
    Usage {
        user: String,
        /// Also list the most recent requests
        #[arg(short, long, default_value_t = 0)]
        recent: usize,
    },

    /// List model pricing (per 1M tokens)
    Pricing,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Models => commands::models::run().await?,
        Commands::Account { user } => commands::account::show(&user).await?,
        Commands::Grant { user, credits } => commands::account::grant(&user, credits).await?,
        Commands::Unlimited { user, off } => commands::account::unlimited(&user, !off).await?,
        Commands::Usage { user, recent } => commands::usage::usage(&user, recent).await?,
        Commands::Pricing => commands::usage::pricing().await?,
    }

    Ok(())
}
