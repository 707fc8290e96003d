//! ActuSync CLI
//!
//! Command-line tools for exercising the sync engine against a simulated
//! device.
//!
//! # Commands
//!
//! - `simulate` - Sync a simulated device into memory stores
//! - `sync` - Sync a simulated device into file stores under `--path`
//! - `status` - Display the stored cursor and events under `--path`

mod commands;

use clap::{Parser, Subcommand};
use commands::DeviceArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ActuSync command-line tools.
#[derive(Parser)]
#[command(name = "actusync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync data directory
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
    /// Sync a simulated device into memory stores
    Simulate(DeviceArgs),

    /// Sync a simulated device into file stores, resuming from the stored cursor
    Sync(DeviceArgs),

    /// Display the stored cursor and events
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so json output stays parseable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate(args) => {
            commands::simulate::run(&args).await?;
        }
        Commands::Sync(args) => {
            let path = cli.path.ok_or("Data path required for sync")?;
            commands::sync::run(&path, &args).await?;
        }
        Commands::Status { format } => {
            let path = cli.path.ok_or("Data path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Version => {
            println!("ActuSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
