//! Indexer daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, validate-rules)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, StartArgs};
pub use commands::{apply_start_overrides, start_daemon, validate_rules};
