//! Command implementations for the quarry binary.
//!
//! Handles:
//! - rebuild: Load records from a JSON file and rebuild the index
//! - search: Compile criteria from flags and print matching ids
//! - stats: Show document count and schema of the current snapshot

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use quarry_indexing::{
    IndexerConfig, IndexingError, JsonFileDataSource, QueueConfig, RecordIndexer,
};
use quarry_search::{
    parse_date, search, FieldKind, QueryValue, SchemaRegistry, SearchCriteria, SearchIndex,
    SearchIndexConfig, SearchOptions, SearchResults, SearcherContextManager,
};
use quarry_types::Settings;

use crate::cli::SearchArgs;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    index_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(index_path) = index_path_override {
        settings.index_path = index_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Freeze the configured schema and open the on-disk index.
pub fn open_index(settings: &Settings) -> Result<SearchIndex> {
    let registry = SchemaRegistry::from_settings(&settings.record_types, &settings.fields)
        .context("Invalid field schema")?;
    if registry.record_types().is_empty() {
        bail!("No record types configured");
    }
    let schema = registry.freeze().context("Invalid field schema")?;

    let index_path = settings.expanded_index_path();
    info!("Opening index at {:?}", index_path);
    let config = SearchIndexConfig::new(settings.index_id.as_str(), index_path)
        .with_memory_mb(settings.writer_memory_mb);
    SearchIndex::open_or_create(config, Arc::new(schema)).context("Failed to open index")
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    pub records_read: usize,
    pub skipped: u64,
    pub num_docs: u64,
}

/// Rebuild the index from `records` and wait until it is searchable.
pub async fn run_rebuild(settings: &Settings, records: &Path) -> Result<RebuildSummary> {
    let source = JsonFileDataSource::open(records)
        .with_context(|| format!("Failed to read records from {:?}", records))?;
    let records_read = source.len();

    let index = open_index(settings)?;
    let contexts = Arc::new(SearcherContextManager::new());
    let config = IndexerConfig::default()
        .with_queue(QueueConfig::from(&settings.queue))
        .with_default_limit(settings.search.default_limit);
    let indexer = RecordIndexer::open(index, Arc::new(source), contexts.clone(), config)
        .context("Failed to start indexer")?;

    indexer.rebuild_index()?;
    match indexer.wait_for_changes().await {
        Ok(()) => {}
        // Skipped records were logged by the observer; the rebuild committed.
        Err(e @ IndexingError::MutationFailed { .. }) if !e.is_fatal() => {
            warn!(error = %e, "Rebuild skipped records");
        }
        Err(e) => return Err(e).context("Rebuild failed"),
    }

    let skipped = indexer.stats().failed;
    let num_docs = indexer.searcher_context()?.num_docs()?;
    indexer.shutdown().await?;
    contexts.shutdown();

    Ok(RebuildSummary {
        records_read,
        skipped,
        num_docs,
    })
}

/// Turn search flags into criteria over the configured schema.
pub fn build_criteria(index: &SearchIndex, args: &SearchArgs) -> Result<SearchCriteria> {
    let schema = index.schema();
    let mut criteria = SearchCriteria::new(schema.clone());

    if let Some(record_type) = &args.record_type {
        criteria = criteria.record_type(record_type);
    }
    if let Some(id) = &args.id {
        criteria = criteria.id(id);
    }

    match (&args.field, &args.value, &args.from, &args.to) {
        (Some(field), Some(value), None, None) => {
            let kind = schema.resolve(field)?.kind();
            criteria = criteria.field(field, typed_value(kind, value)?);
        }
        (Some(field), None, Some(from), Some(to)) => {
            let from = parse_date(from).with_context(|| format!("Invalid date: {}", from))?;
            let to = parse_date(to).with_context(|| format!("Invalid date: {}", to))?;
            criteria = criteria.date_range(field, from, to, true, true, args.resolution.into());
        }
        (None, None, None, None) => {}
        (None, _, _, _) => bail!("--value and --from/--to need --field"),
        _ => bail!("--field needs either --value or --from and --to"),
    }
    Ok(criteria)
}

fn typed_value(kind: FieldKind, raw: &str) -> Result<QueryValue> {
    let value = match kind {
        FieldKind::Text => QueryValue::from(raw),
        FieldKind::I64 => QueryValue::I64(
            raw.trim()
                .parse()
                .with_context(|| format!("Not an integer: {}", raw))?,
        ),
        FieldKind::F64 => QueryValue::F64(
            raw.trim()
                .parse()
                .with_context(|| format!("Not a number: {}", raw))?,
        ),
        FieldKind::Date => {
            QueryValue::Date(parse_date(raw).with_context(|| format!("Invalid date: {}", raw))?)
        }
    };
    Ok(value)
}

/// Run one search against the latest committed snapshot.
pub fn run_search(settings: &Settings, args: &SearchArgs) -> Result<SearchResults> {
    let index = open_index(settings)?;
    let criteria = build_criteria(&index, args)?;
    let query = criteria.compile().context("Invalid search")?;

    let contexts = SearcherContextManager::new();
    contexts.register_index(&index)?;
    let handle = contexts.acquire(index.index_id())?;
    let limit = args.limit.unwrap_or(settings.search.default_limit);
    let results = search(&handle, &query, SearchOptions::new().with_limit(limit))?;
    handle.release();
    Ok(results)
}

/// Snapshot statistics for `stats`.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub index_id: String,
    pub num_docs: u64,
    pub opstamp: u64,
    pub record_types: Vec<String>,
    pub fields: Vec<String>,
}

pub fn run_stats(settings: &Settings) -> Result<IndexStats> {
    let index = open_index(settings)?;
    let contexts = SearcherContextManager::new();
    contexts.register_index(&index)?;
    let handle = contexts.acquire(index.index_id())?;

    Ok(IndexStats {
        index_id: index.index_id().to_string(),
        num_docs: handle.num_docs()?,
        opstamp: handle.opstamp(),
        record_types: index
            .schema()
            .record_types()
            .iter()
            .map(|rt| rt.to_string())
            .collect(),
        fields: handle.field_names()?,
    })
}

pub async fn handle_rebuild(settings: &Settings, records: &Path) -> Result<()> {
    let summary = run_rebuild(settings, records).await?;
    println!("Read {} records", summary.records_read);
    println!("Indexed documents: {}", summary.num_docs);
    if summary.skipped > 0 {
        println!("Skipped records: {}", summary.skipped);
    }
    Ok(())
}

pub fn handle_search(settings: &Settings, args: &SearchArgs) -> Result<()> {
    let results = run_search(settings, args)?;
    println!("Total hits: {}", results.total_hits);
    for hit in &results.hits {
        println!("{:>8.3}  {}  ({})", hit.score, hit.node_id, hit.record_type);
    }
    Ok(())
}

pub fn handle_stats(settings: &Settings) -> Result<()> {
    let stats = run_stats(settings)?;
    println!("Index: {}", stats.index_id);
    println!("Documents: {}", stats.num_docs);
    println!("Opstamp: {}", stats.opstamp);
    println!("Record types: {}", stats.record_types.join(", "));
    println!("Fields: {}", stats.fields.join(", "));
    Ok(())
}
