//! End-to-end test infrastructure for quarry.
//!
//! Provides a shared TestHarness, the standard test schema and a data
//! source with two Documents and three Pictures.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use quarry_indexing::{DataSource, IndexerConfig, InMemoryDataSource, RecordIndexer};
use quarry_search::{
    FieldDefinition, IndexSchema, SchemaRegistry, SearchIndex, SearchIndexConfig,
    SearcherContextManager,
};
use quarry_types::{ExternalRecord, RecordType};

/// Fields declared by [`test_schema`].
pub const DECLARED_FIELDS: usize = 13;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Path for on-disk index files
    pub index_path: PathBuf,
    /// One registry per harness, like one per process
    pub contexts: Arc<SearcherContextManager>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index_path = temp_dir.path().join("index");

        Self {
            _temp_dir: temp_dir,
            index_path,
            contexts: Arc::new(SearcherContextManager::new()),
        }
    }

    /// Open an on-disk index with the standard schema.
    pub fn open_index(&self, index_id: &str) -> SearchIndex {
        SearchIndex::open_or_create(
            SearchIndexConfig::new(index_id, &self.index_path),
            Arc::new(test_schema()),
        )
        .expect("Failed to open index")
    }

    /// Open an indexer over a RAM index with the standard schema.
    pub fn in_memory_indexer(
        &self,
        index_id: &str,
        source: Arc<dyn DataSource>,
    ) -> RecordIndexer {
        let index = SearchIndex::open_or_create(
            SearchIndexConfig::in_memory(index_id),
            Arc::new(test_schema()),
        )
        .expect("Failed to open index");
        self.indexer(index, source)
    }

    pub fn indexer(&self, index: SearchIndex, source: Arc<dyn DataSource>) -> RecordIndexer {
        RecordIndexer::open(index, source, self.contexts.clone(), IndexerConfig::default())
            .expect("Failed to open indexer")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Two record types and thirteen fields, date components derived from
/// `DateCreated`.
pub fn test_schema() -> IndexSchema {
    let mut registry = SchemaRegistry::new();
    for record_type in ["Documents", "Pictures"] {
        registry
            .register_record_type(RecordType::new(record_type))
            .expect("Failed to register record type");
    }

    let fields = [
        FieldDefinition::new("Author"),
        FieldDefinition::new("DateCreated").with_type("DateTime"),
        FieldDefinition::new("Title"),
        FieldDefinition::new("Photographer"),
        FieldDefinition::new("YearCreated")
            .with_type("Date.Year")
            .with_source("DateCreated"),
        FieldDefinition::new("MonthCreated")
            .with_type("Date.Month")
            .with_source("DateCreated"),
        FieldDefinition::new("DayCreated")
            .with_type("Date.Day")
            .with_source("DateCreated"),
        FieldDefinition::new("HourCreated")
            .with_type("Date.Hour")
            .with_source("DateCreated"),
        FieldDefinition::new("MinuteCreated")
            .with_type("Date.Minute")
            .with_source("DateCreated"),
        FieldDefinition::new("SomeNumber").with_type("Number"),
        FieldDefinition::new("SomeFloat").with_type("Float"),
        FieldDefinition::new("SomeDouble").with_type("Double"),
        FieldDefinition::new("SomeLong").with_type("Long"),
    ];
    for field in fields {
        registry.register(field).expect("Failed to register field");
    }
    registry.freeze().expect("Failed to freeze schema")
}

/// A Documents record with every numeric field filled in.
pub fn document(id: &str, title: &str, author: &str, created: DateTime<Utc>) -> ExternalRecord {
    ExternalRecord::new(id, "Documents")
        .with_field("Title", title)
        .with_field("Author", author)
        .with_field("DateCreated", created.to_rfc3339())
        .with_field("SomeNumber", "42")
        .with_field("SomeFloat", "1.5")
        .with_field("SomeDouble", "2.25")
        .with_field("SomeLong", "9000000000")
}

pub fn picture(
    id: &str,
    title: &str,
    photographer: &str,
    created: DateTime<Utc>,
) -> ExternalRecord {
    ExternalRecord::new(id, "Pictures")
        .with_field("Title", title)
        .with_field("Photographer", photographer)
        .with_field("DateCreated", created.to_rfc3339())
        .with_field("SomeNumber", "7")
}

/// Five records dated within the last few months.
pub fn test_records() -> Vec<ExternalRecord> {
    let now = Utc::now();
    vec![
        document("1", "Quarterly report", "Alice Smith", now - Duration::days(1)),
        document("2", "Meeting notes", "Bob Jones", now - Duration::days(20)),
        picture("3", "Harbour at dawn", "Carla Diaz", now - Duration::days(2)),
        picture("4", "Mountain pass", "Dev Patel", now - Duration::days(45)),
        picture("5", "City lights", "Carla Diaz", now - Duration::days(90)),
    ]
}

/// Data source seeded with [`test_records`].
pub fn test_data_source() -> Arc<InMemoryDataSource> {
    Arc::new(InMemoryDataSource::from_records(test_records()))
}

/// A new Documents record with a generated id.
pub fn create_new_document() -> ExternalRecord {
    document(
        &ulid::Ulid::new().to_string(),
        "Fresh document",
        "Eve Adams",
        Utc::now(),
    )
}
