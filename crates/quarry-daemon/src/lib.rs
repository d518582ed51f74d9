//! Quarry binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (rebuild, search, stats)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, Resolution, SearchArgs};
pub use commands::{
    build_criteria, handle_rebuild, handle_search, handle_stats, init_logging, load_settings,
    open_index, run_rebuild, run_search, run_stats, IndexStats, RebuildSummary,
};
