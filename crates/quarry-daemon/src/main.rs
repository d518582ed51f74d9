//! Quarry
//!
//! Full-text index over externally owned records.
//!
//! # Usage
//!
//! ```bash
//! quarry rebuild --records records.json
//! quarry search --field Title --value report
//! quarry search --field YearCreated --from 2020-01-01 --to 2024-12-31 --resolution year
//! quarry stats
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/quarry/config.toml)
//! 3. Environment variables (QUARRY_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use quarry_daemon::{
    handle_rebuild, handle_search, handle_stats, init_logging, load_settings, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(
        cli.config.as_deref(),
        cli.index_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Rebuild { records } => {
            handle_rebuild(&settings, &records).await?;
        }
        Commands::Search(args) => {
            handle_search(&settings, &args)?;
        }
        Commands::Stats => {
            handle_stats(&settings)?;
        }
    }

    Ok(())
}
