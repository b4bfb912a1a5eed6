//! Event Indexer Daemon
//!
//! Runs the indexer coordinator and worker loops against a local event
//! store, search index and object directory.
//!
//! # Usage
//!
//! ```bash
//! indexer-daemon start [--no-coordinator] [--workers N] [--codes a,b]
//!                      [--db-path PATH] [--index-path PATH]
//! indexer-daemon validate-rules <DIR>
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/event-indexer/config.toml)
//! 3. Config file given with `--config`
//! 4. Environment variables (INDEXER_*)
//! 5. CLI flags

use std::path::Path;

use anyhow::Result;
use clap::Parser;

use indexer_daemon::{start_daemon, validate_rules, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            start_daemon(cli.config.as_deref(), cli.log_level.as_deref(), args).await?;
        }
        Commands::ValidateRules { dir } => {
            validate_rules(Path::new(&dir))?;
        }
    }

    Ok(())
}
