//! Duka CLI - Database migrations and maintenance tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! duka migrate
//!
//! # Seed the catalog with the built-in demo data
//! duka seed
//!
//! # Seed the catalog from a YAML file
//! duka seed --file catalog.yaml
//!
//! # Keep only the newest 100 stock movements per product
//! duka prune-movements --keep 100
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Load a product/customer catalog
//! - `prune-movements` - Trim the stock movement ledger

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "duka")]
#[command(author, version, about = "Duka CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed products and customers from a YAML catalog
    Seed {
        /// Path to a YAML catalog file; omit to load the demo set
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Delete all but the newest N stock movements per product
    PruneMovements {
        /// Movements to retain per product
        #[arg(short, long, default_value_t = 100)]
        keep: i64,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::run(file.as_deref()).await?,
        Commands::PruneMovements { keep } => commands::prune::run(keep).await?,
    }
    Ok(())
}
