//! Full index rebuild from the data source.
//!
//! Clears the index and re-reads every registered record type through
//! the document mapper. Nothing is committed here; the queue worker owns
//! commit and rollback.
//!
//! The clear is a delete-all query rather than
//! `IndexWriter::delete_all_documents`, which rewinds the writer's
//! opstamps and lets deletes issued afterwards hit the new documents.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tantivy::query::AllQuery;
use tantivy::{IndexWriter, Term};
use tracing::{debug, info, warn};

use quarry_search::DocumentMapper;
use quarry_types::RecordType;

use crate::applier::RecordFailure;
use crate::error::ApplyError;
use crate::source::DataSource;

/// How a rebuild reports progress and treats unmappable records.
#[derive(Debug, Clone)]
pub struct RebuildConfig {
    /// Records read between two progress reports
    pub report_every: usize,
    /// Skip records that fail to map; otherwise the first one aborts
    pub skip_unmappable: bool,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            report_every: 100,
            skip_unmappable: true,
        }
    }
}

impl RebuildConfig {
    pub fn with_report_every(mut self, records: usize) -> Self {
        self.report_every = records.max(1);
        self
    }

    pub fn with_skip_unmappable(mut self, skip: bool) -> Self {
        self.skip_unmappable = skip;
        self
    }
}

/// Running counters for one rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildProgress {
    /// Records read from the source so far
    pub seen: u64,
    /// Indexed records per record type, in rebuild order
    pub indexed_by_type: Vec<(RecordType, u64)>,
    pub skipped: u64,
    /// Set once every record type has been read
    pub finished: bool,
}

impl RebuildProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_indexed(&mut self, record_type: &RecordType) {
        self.seen += 1;
        if let Some((_, count)) = self
            .indexed_by_type
            .iter_mut()
            .find(|(rt, _)| rt == record_type)
        {
            *count += 1;
            return;
        }
        self.indexed_by_type.push((record_type.clone(), 1));
    }

    pub fn record_skipped(&mut self) {
        self.seen += 1;
        self.skipped += 1;
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Indexed records across all types.
    pub fn indexed(&self) -> u64 {
        self.indexed_by_type.iter().map(|(_, n)| n).sum()
    }

    pub fn indexed_for(&self, record_type: &RecordType) -> u64 {
        self.indexed_by_type
            .iter()
            .find_map(|(rt, n)| (rt == record_type).then_some(*n))
            .unwrap_or_default()
    }
}

/// What a finished rebuild did.
#[derive(Debug, Clone)]
pub struct RebuildResult {
    pub progress: RebuildProgress,
    /// Records skipped because they failed to map
    pub failures: Vec<RecordFailure>,
    pub elapsed: Duration,
}

/// Receives rebuild progress. Called on the queue worker thread.
pub trait ProgressCallback: Send {
    fn on_progress(&self, progress: &RebuildProgress);
}

/// Discards progress reports.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &RebuildProgress) {}
}

/// Logs every `interval`-th report and the final one at info level.
pub struct LoggingProgressCallback {
    interval: u64,
}

impl LoggingProgressCallback {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1) as u64,
        }
    }
}

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &RebuildProgress) {
        if !progress.finished && progress.seen % self.interval != 0 {
            return;
        }
        info!(
            seen = progress.seen,
            indexed = progress.indexed(),
            skipped = progress.skipped,
            finished = progress.finished,
            "Rebuild progress"
        );
    }
}

/// Clear the index and add every record of every registered type.
///
/// Each record replaces any earlier document with the same id, so
/// duplicate ids in the source collapse to the last one read.
pub fn rebuild_index<P: ProgressCallback + ?Sized>(
    writer: &IndexWriter,
    mapper: &DocumentMapper,
    source: &dyn DataSource,
    config: &RebuildConfig,
    reporter: &P,
) -> Result<RebuildResult, ApplyError> {
    let started = Instant::now();
    let schema = mapper.schema();
    let report_every = config.report_every.max(1) as u64;
    let mut progress = RebuildProgress::new();
    let mut failures = Vec::new();
    let mut added: HashSet<String> = HashSet::new();

    info!(source = source.name(), "Rebuilding index from source");
    writer.delete_query(Box::new(AllQuery))?;

    for record_type in schema.record_types() {
        let records = source.records(record_type)?;
        debug!(record_type = %record_type, count = records.len(), "Read records");

        for record in records {
            match mapper.map_to_doc(&record, record_type) {
                Ok(doc) => {
                    if !added.insert(record.id.clone()) {
                        writer.delete_term(Term::from_field_text(schema.node_id_field(), &record.id));
                    }
                    writer.add_document(doc)?;
                    progress.record_indexed(record_type);
                }
                Err(e) if config.skip_unmappable => {
                    warn!(id = %record.id, record_type = %record_type, error = %e, "Skipping unmappable record");
                    progress.record_skipped();
                    failures.push(RecordFailure {
                        id: record.id.clone(),
                        error: ApplyError::Mapping(e),
                    });
                }
                Err(e) => return Err(ApplyError::Mapping(e)),
            }

            if progress.seen % report_every == 0 {
                reporter.on_progress(&progress);
            }
        }
        debug!(record_type = %record_type, indexed = progress.indexed_for(record_type), "Record type rebuilt");
    }

    progress.finish();
    reporter.on_progress(&progress);

    let elapsed = started.elapsed();
    info!(
        indexed = progress.indexed(),
        skipped = progress.skipped,
        elapsed_ms = elapsed.as_millis() as u64,
        "Index rebuild staged"
    );

    Ok(RebuildResult {
        progress,
        failures,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::source::InMemoryDataSource;
    use quarry_search::{FieldDefinition, SchemaRegistry, SearchIndex, SearchIndexConfig};
    use quarry_types::ExternalRecord;

    struct Recording(Arc<Mutex<Vec<u64>>>);

    impl ProgressCallback for Recording {
        fn on_progress(&self, progress: &RebuildProgress) {
            self.0.lock().unwrap().push(progress.seen);
        }
    }

    fn index() -> SearchIndex {
        let mut registry = SchemaRegistry::new();
        for name in ["Documents", "Pictures"] {
            registry.register_record_type(RecordType::new(name)).unwrap();
        }
        registry
            .register(FieldDefinition::new("SomeNumber").with_type("Number"))
            .unwrap();
        SearchIndex::open_or_create(
            SearchIndexConfig::in_memory("rebuild"),
            Arc::new(registry.freeze().unwrap()),
        )
        .unwrap()
    }

    fn source() -> InMemoryDataSource {
        InMemoryDataSource::from_records([
            ExternalRecord::new("1", "Documents").with_field("SomeNumber", "1"),
            ExternalRecord::new("2", "Documents").with_field("SomeNumber", "oops"),
            ExternalRecord::new("3", "Pictures").with_field("SomeNumber", "3"),
            ExternalRecord::new("4", "Videos"),
        ])
    }

    #[test]
    fn test_rebuild_config() {
        let config = RebuildConfig::default();
        assert_eq!(config.report_every, 100);
        assert!(config.skip_unmappable);
        assert_eq!(config.with_report_every(0).report_every, 1);
    }

    #[test]
    fn test_progress_counts_per_type() {
        let docs = RecordType::new("Documents");
        let mut progress = RebuildProgress::new();
        progress.record_indexed(&docs);
        progress.record_indexed(&docs);
        progress.record_indexed(&RecordType::new("Pictures"));
        progress.record_skipped();

        assert_eq!(progress.seen, 4);
        assert_eq!(progress.indexed(), 3);
        assert_eq!(progress.indexed_for(&docs), 2);
        assert_eq!(progress.indexed_for(&RecordType::new("Videos")), 0);
        assert_eq!(progress.skipped, 1);
    }

    #[test]
    fn test_rebuild_skips_unmappable_records() {
        let index = index();
        let mut writer = index.writer().unwrap();
        let mapper = DocumentMapper::new(index.schema().clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let result = rebuild_index(
            &writer,
            &mapper,
            &source(),
            &RebuildConfig::default().with_report_every(2),
            &Recording(seen.clone()),
        )
        .unwrap();
        writer.commit().unwrap();

        assert!(result.progress.finished);
        assert_eq!(result.progress.indexed(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].id, "2");
        // Every second record, then the final report
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);

        assert_eq!(index.reader().unwrap().searcher().num_docs(), 2);
    }

    #[test]
    fn test_rebuild_after_committed_delete_keeps_new_documents() {
        let index = index();
        let mut writer = index.writer().unwrap();
        let mapper = DocumentMapper::new(index.schema().clone());
        let source = source();
        let config = RebuildConfig::default();

        rebuild_index(&writer, &mapper, &source, &config, &NoOpProgressCallback).unwrap();
        writer.commit().unwrap();

        writer.delete_term(Term::from_field_text(index.schema().node_id_field(), "3"));
        writer.commit().unwrap();
        assert_eq!(index.reader().unwrap().searcher().num_docs(), 1);

        source.remove("3");
        source.insert(ExternalRecord::new("5", "Pictures").with_field("SomeNumber", "5"));
        source.insert(ExternalRecord::new("6", "Documents").with_field("SomeNumber", "6"));

        let result =
            rebuild_index(&writer, &mapper, &source, &config, &NoOpProgressCallback).unwrap();
        writer.commit().unwrap();

        assert_eq!(result.progress.indexed(), 3);
        assert_eq!(index.reader().unwrap().searcher().num_docs(), 3);
    }

    #[test]
    fn test_rebuild_aborts_when_not_skipping() {
        let index = index();
        let writer = index.writer().unwrap();
        let mapper = DocumentMapper::new(index.schema().clone());

        let err = rebuild_index(
            &writer,
            &mapper,
            &source(),
            &RebuildConfig::default().with_skip_unmappable(false),
            &NoOpProgressCallback,
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::Mapping(_)));
    }
}
