//! mirrorlite CLI
//!
//! Command-line tools for operating the database mirroring engine.
//!
//! # Commands
//!
//! - `run` - Run the engine until a termination signal arrives
//! - `sync` - Force one sync cycle
//! - `status` - Show local and remote state
//! - `restore` - Recover the database from the bucket onto local disk

mod commands;

use clap::{Parser, Subcommand};
use mirrorlite_engine::{EngineConfig, FsBlobStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mirrorlite database mirroring tools.
#[derive(Parser)]
#[command(name = "mirrorlite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bucket directory backing the object store
    #[arg(global = true, short, long)]
    bucket: Option<PathBuf>,

    /// Remote key of the database blob
    #[arg(global = true, short, long)]
    key: Option<String>,

    /// Local database path
    #[arg(global = true, short, long)]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until a termination signal arrives
    Run,

    /// Force one sync cycle
    Sync,

    /// Show local and remote state
    Status,

    /// Recover the database from the bucket onto local disk
    Restore,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = EngineConfig::from_env();
    if let Some(key) = cli.key {
        config = config.with_remote_key(key);
    }
    if let Some(db) = cli.db {
        config = config.with_local_path(db);
    }
    let bucket_dir = cli
        .bucket
        .unwrap_or_else(|| PathBuf::from(&config.bucket));
    let store = FsBlobStore::new(bucket_dir);

    match cli.command {
        Commands::Run => commands::run::run(config, store).await?,
        Commands::Sync => commands::sync::run(config, store).await?,
        Commands::Status => commands::status::run(config, store).await?,
        Commands::Restore => commands::restore::run(config, store).await?,
        Commands::Version => {
            println!("mirrorlite CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
