//! CLI argument parsing for the quarry binary.
//!
//! CLI flags override all other config sources.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use quarry_search::DateResolution;

/// Quarry record indexer
///
/// Builds and queries a full-text index over records read from a JSON file.
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/quarry/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override index path
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild the index from a records file
    Rebuild {
        /// JSON array or JSON lines of records
        #[arg(short, long)]
        records: PathBuf,
    },

    /// Search the index
    Search(SearchArgs),

    /// Show index statistics
    Stats,
}

/// Search arguments.
///
/// `--field` with `--value` is an equality match; `--field` with
/// `--from`/`--to` is an inclusive date range.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Declared field to match on
    #[arg(short, long)]
    pub field: Option<String>,

    /// Value the field must equal
    #[arg(short, long, conflicts_with_all = ["from", "to"])]
    pub value: Option<String>,

    /// Lower date bound (RFC 3339 or YYYY-MM-DD)
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// Upper date bound (RFC 3339 or YYYY-MM-DD)
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Resolution both date bounds are truncated to
    #[arg(long, value_enum, default_value_t = Resolution::Day)]
    pub resolution: Resolution,

    /// Restrict to one record type
    #[arg(short = 't', long)]
    pub record_type: Option<String>,

    /// Restrict to one record id
    #[arg(long)]
    pub id: Option<String>,

    /// Maximum hits to print (default from config)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl From<Resolution> for DateResolution {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Year => DateResolution::Year,
            Resolution::Month => DateResolution::Month,
            Resolution::Day => DateResolution::Day,
            Resolution::Hour => DateResolution::Hour,
            Resolution::Minute => DateResolution::Minute,
            Resolution::Second => DateResolution::Second,
        }
    }
}
