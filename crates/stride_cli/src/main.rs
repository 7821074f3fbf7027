//! Stride CLI
//!
//! Command-line tools for inspecting and repairing an on-disk operation log.
//!
//! # Commands
//!
//! - `stats` - Display log counts and journal health
//! - `pending` - List operations waiting for delivery
//! - `dead-letters` - List operations set aside for user resolution
//! - `requeue` / `discard` - Resolve a dead letter
//! - `verify` - Check journal integrity
//! - `compact` - Rewrite the journal without superseded records
//! - `config` - Show the effective configuration

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Stride operation log tools.
#[derive(Parser)]
#[command(name = "stride")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log counts and journal health
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List operations waiting for delivery
    Pending {
        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List dead-lettered operations
    DeadLetters {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Move a dead letter back into the pending log
    Requeue {
        /// Id of the dead-lettered operation
        id: u64,
    },

    /// Delete a dead letter permanently
    Discard {
        /// Id of the dead-lettered operation
        id: u64,
    },

    /// Verify journal integrity
    Verify,

    /// Compact the journal to reclaim space
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show the effective configuration
    Config,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = config::CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Stats { format } => {
            let path = cli.path.ok_or("Journal path required for stats")?;
            commands::stats::run(&path, &settings, &format)?;
        }
        Commands::Pending { limit, format } => {
            let path = cli.path.ok_or("Journal path required for pending")?;
            commands::pending::run(&path, &settings, limit, &format)?;
        }
        Commands::DeadLetters { format } => {
            let path = cli.path.ok_or("Journal path required for dead-letters")?;
            commands::dead_letters::run(&path, &settings, &format)?;
        }
        Commands::Requeue { id } => {
            let path = cli.path.ok_or("Journal path required for requeue")?;
            commands::resolve::requeue(&path, &settings, id)?;
        }
        Commands::Discard { id } => {
            let path = cli.path.ok_or("Journal path required for discard")?;
            commands::resolve::discard(&path, &settings, id)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path, &settings, dry_run)?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Version => {
            println!("Stride CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Stride Engine v{}", stride_engine::VERSION);
        }
    }

    Ok(())
}
