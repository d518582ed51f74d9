//! Applying mutations to the index.
//!
//! [`MutationApplier`] is the seam between the queue worker and the
//! engine; [`IndexWriterAdapter`] is the tantivy implementation and the
//! only holder of the index writer.

use std::sync::Arc;

use tantivy::{IndexWriter, Term};
use tracing::debug;

use quarry_search::{DocumentMapper, IndexSchema, SearchError, SearchIndex};
use quarry_types::{ExternalRecord, RecordType};

use crate::error::ApplyError;
use crate::mutation::Mutation;
use crate::rebuild::{rebuild_index, NoOpProgressCallback, ProgressCallback, RebuildConfig};
use crate::source::DataSource;

/// Applies mutations to one index. Owned by a single worker.
pub trait MutationApplier: Send {
    /// Apply one mutation without committing.
    fn apply(&mut self, mutation: &Mutation) -> Result<ApplyReport, ApplyError>;

    /// Commit everything applied so far. Returns the commit opstamp.
    fn commit(&mut self) -> Result<u64, ApplyError>;

    /// Discard everything applied since the last commit.
    fn rollback(&mut self) -> Result<(), ApplyError>;

    /// Identity of the index this applier writes to.
    fn index_id(&self) -> &str;

    /// Get the name of this applier for logging.
    fn name(&self) -> &str;
}

/// A record that was skipped while applying a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub id: String,
    pub error: ApplyError,
}

/// Result of applying one mutation.
#[derive(Debug, Default, Clone)]
pub struct ApplyReport {
    /// Documents added or replaced
    pub indexed: usize,
    /// Documents removed by id
    pub deleted: usize,
    /// Records skipped without failing the mutation
    pub failures: Vec<RecordFailure>,
}

impl ApplyReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one added or replaced document.
    pub fn record_indexed(&mut self) {
        self.indexed += 1;
    }

    /// Count one delete-by-id.
    pub fn record_deleted(&mut self) {
        self.deleted += 1;
    }

    /// Note a record that was skipped.
    pub fn record_failure(&mut self, id: impl Into<String>, error: ApplyError) {
        self.failures.push(RecordFailure {
            id: id.into(),
            error,
        });
    }
}

/// Tantivy-backed applier.
pub struct IndexWriterAdapter {
    index_id: String,
    writer: IndexWriter,
    mapper: DocumentMapper,
    source: Arc<dyn DataSource>,
    rebuild_config: RebuildConfig,
    progress: Box<dyn ProgressCallback>,
}

impl IndexWriterAdapter {
    /// Take the writer for `index`. Fails if another writer holds the lock.
    pub fn new(index: &SearchIndex, source: Arc<dyn DataSource>) -> Result<Self, SearchError> {
        Ok(Self {
            index_id: index.index_id().to_string(),
            writer: index.writer()?,
            mapper: DocumentMapper::new(index.schema().clone()),
            source,
            rebuild_config: RebuildConfig::default(),
            progress: Box::new(NoOpProgressCallback),
        })
    }

    /// Set how `RebuildAll` reports progress and skips records.
    pub fn with_rebuild_config(mut self, config: RebuildConfig) -> Self {
        self.rebuild_config = config;
        self
    }

    /// Receive rebuild progress reports.
    pub fn with_progress(mut self, callback: Box<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Schema documents are mapped against.
    pub fn schema(&self) -> &Arc<IndexSchema> {
        self.mapper.schema()
    }

    fn node_term(&self, id: &str) -> Term {
        Term::from_field_text(self.schema().node_id_field(), id)
    }

    /// Delete-by-id then add: last writer wins per id.
    fn upsert(&self, record: &ExternalRecord, record_type: &RecordType) -> Result<(), ApplyError> {
        let doc = self.mapper.map_to_doc(record, record_type)?;
        self.writer.delete_term(self.node_term(&record.id));
        self.writer.add_document(doc)?;
        debug!(id = %record.id, record_type = %record_type, "Indexed record");
        Ok(())
    }

    fn delete(&self, id: &str) {
        self.writer.delete_term(self.node_term(id));
        debug!(id, "Deleted record");
    }
}

impl MutationApplier for IndexWriterAdapter {
    fn apply(&mut self, mutation: &Mutation) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::new();
        match mutation {
            Mutation::RebuildAll => {
                let result = rebuild_index(
                    &self.writer,
                    &self.mapper,
                    self.source.as_ref(),
                    &self.rebuild_config,
                    self.progress.as_ref(),
                )?;
                report.indexed = result.progress.indexed() as usize;
                for failure in result.failures {
                    report.record_failure(failure.id, failure.error);
                }
            }
            Mutation::Upsert {
                record,
                record_type,
            } => {
                self.upsert(record, record_type)?;
                report.record_indexed();
            }
            Mutation::Reindex { id, record_type } => match self.source.record(record_type, id)? {
                Some(record) => {
                    self.upsert(&record, record_type)?;
                    report.record_indexed();
                }
                None => {
                    debug!(id = %id, record_type = %record_type, "Record gone from source");
                    self.delete(id);
                    report.record_deleted();
                }
            },
            Mutation::Delete { id } => {
                self.delete(id);
                report.record_deleted();
            }
        }
        Ok(report)
    }

    fn commit(&mut self) -> Result<u64, ApplyError> {
        let opstamp = self.writer.commit()?;
        debug!(index_id = %self.index_id, opstamp, "Committed index");
        Ok(opstamp)
    }

    fn rollback(&mut self) -> Result<(), ApplyError> {
        let opstamp = self.writer.rollback()?;
        debug!(index_id = %self.index_id, opstamp, "Rolled back index");
        Ok(())
    }

    fn index_id(&self) -> &str {
        &self.index_id
    }

    fn name(&self) -> &str {
        "tantivy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryDataSource;
    use quarry_search::{FieldDefinition, SchemaRegistry, SearchIndexConfig};

    fn index() -> SearchIndex {
        let mut registry = SchemaRegistry::new();
        registry
            .register_record_type(RecordType::new("Documents"))
            .unwrap();
        registry.register(FieldDefinition::new("Title")).unwrap();
        registry
            .register(FieldDefinition::new("SomeNumber").with_type("Number"))
            .unwrap();
        SearchIndex::open_or_create(
            SearchIndexConfig::in_memory("docs"),
            Arc::new(registry.freeze().unwrap()),
        )
        .unwrap()
    }

    fn doc(id: &str, title: &str) -> ExternalRecord {
        ExternalRecord::new(id, "Documents").with_field("Title", title)
    }

    fn num_docs(index: &SearchIndex) -> u64 {
        index.reader().unwrap().searcher().num_docs()
    }

    #[test]
    fn test_apply_report() {
        let mut report = ApplyReport::new();
        report.record_indexed();
        report.record_deleted();
        report.record_failure("9", ApplyError::Engine("x".into()));
        assert_eq!((report.indexed, report.deleted), (1, 1));
        assert_eq!(report.failures[0].id, "9");
    }

    #[test]
    fn test_upsert_is_last_writer_wins() {
        let index = index();
        let source = Arc::new(InMemoryDataSource::new());
        let mut adapter = IndexWriterAdapter::new(&index, source).unwrap();
        let rt = RecordType::new("Documents");

        adapter.apply(&Mutation::upsert(doc("1", "first"), rt.clone())).unwrap();
        adapter.apply(&Mutation::upsert(doc("1", "second"), rt.clone())).unwrap();
        adapter.apply(&Mutation::upsert(doc("2", "other"), rt)).unwrap();
        adapter.commit().unwrap();

        assert_eq!(num_docs(&index), 2);
    }

    #[test]
    fn test_delete_and_reindex() {
        let index = index();
        let source = Arc::new(InMemoryDataSource::from_records([doc("1", "a"), doc("2", "b")]));
        let mut adapter = IndexWriterAdapter::new(&index, source.clone()).unwrap();
        let rt = RecordType::new("Documents");

        adapter.apply(&Mutation::RebuildAll).unwrap();
        adapter.commit().unwrap();
        assert_eq!(num_docs(&index), 2);

        adapter.apply(&Mutation::delete("1")).unwrap();
        adapter.commit().unwrap();
        assert_eq!(num_docs(&index), 1);

        source.insert(doc("3", "c"));
        let report = adapter.apply(&Mutation::reindex("3", rt.clone())).unwrap();
        assert_eq!(report.indexed, 1);
        source.remove("2");
        let report = adapter.apply(&Mutation::reindex("2", rt)).unwrap();
        assert_eq!(report.deleted, 1);
        adapter.commit().unwrap();
        assert_eq!(num_docs(&index), 1);
    }

    #[test]
    fn test_mapping_failure_is_not_fatal() {
        let index = index();
        let mut adapter =
            IndexWriterAdapter::new(&index, Arc::new(InMemoryDataSource::new())).unwrap();
        let record = ExternalRecord::new("1", "Documents").with_field("SomeNumber", "NaN");
        let err = adapter
            .apply(&Mutation::upsert(record, RecordType::new("Documents")))
            .unwrap_err();
        assert!(matches!(err, ApplyError::Mapping(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rollback_discards_uncommitted() {
        let index = index();
        let mut adapter =
            IndexWriterAdapter::new(&index, Arc::new(InMemoryDataSource::new())).unwrap();
        let rt = RecordType::new("Documents");
        adapter.apply(&Mutation::upsert(doc("1", "kept"), rt.clone())).unwrap();
        adapter.commit().unwrap();

        adapter.apply(&Mutation::RebuildAll).unwrap();
        adapter.rollback().unwrap();
        adapter.commit().unwrap();
        assert_eq!(num_docs(&index), 1);
    }

    #[test]
    fn test_second_writer_is_locked() {
        let index = index();
        let _adapter =
            IndexWriterAdapter::new(&index, Arc::new(InMemoryDataSource::new())).unwrap();
        assert!(IndexWriterAdapter::new(&index, Arc::new(InMemoryDataSource::new())).is_err());
    }
}
