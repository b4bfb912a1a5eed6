//! CLI argument parsing for the indexer daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Event Indexer Daemon
///
/// Claims object change events and keeps the search index in step with them.
#[derive(Parser, Debug)]
#[command(name = "indexer-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/event-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the coordinator and worker loops
    Start(StartArgs),

    /// Load a type rules directory and report what it contains
    ValidateRules {
        /// Directory of type and mapping YAML files
        dir: String,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Run workers only; another process promotes events
    #[arg(long)]
    pub no_coordinator: bool,

    /// Number of worker loops (overrides worker.count)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Worker codes to claim, comma separated (overrides worker.codes)
    #[arg(long, value_delimiter = ',')]
    pub codes: Option<Vec<String>>,

    /// Override event database path
    #[arg(long)]
    pub db_path: Option<String>,

    /// Override search index path
    #[arg(long)]
    pub index_path: Option<String>,
}
