//! EmberDB CLI
//!
//! Command-line tools for EmberDB datastore files.
//!
//! # Commands
//!
//! - `inspect` - Display document, index and log statistics
//! - `verify` - Check every log line without modifying anything
//! - `compact` - Rewrite the logs to hold only live state
//! - `dump` - Print raw log lines for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EmberDB command-line datastore tools.
#[derive(Parser)]
#[command(name = "emberdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the datastore's data log
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display document, index and log statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every log line without modifying anything
    Verify,

    /// Rewrite the logs to hold only live state
    Compact,

    /// Print raw log lines
    Dump {
        /// Maximum number of lines to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Dump the index log instead of the data log
        #[arg(short, long)]
        index: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Datastore path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Datastore path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Datastore path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Dump { limit, index } => {
            let path = cli.path.ok_or("Datastore path required for dump")?;
            commands::dump::run(&path, limit, index)?;
        }
        Commands::Version => {
            println!("EmberDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
