//! External record sources.
//!
//! The queue worker pulls records synchronously: all records of a type
//! for a rebuild, or one record by id for an incremental reindex.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

use quarry_types::{ExternalRecord, RecordType};

/// Failure reading from a data source.
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies external records on demand. Read-only to the indexer.
pub trait DataSource: Send + Sync {
    /// Every record of `record_type`, in source order.
    fn records(&self, record_type: &RecordType) -> Result<Vec<ExternalRecord>, DataSourceError>;

    /// One record by id, if the source still has it.
    fn record(
        &self,
        record_type: &RecordType,
        id: &str,
    ) -> Result<Option<ExternalRecord>, DataSourceError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Thread-safe in-memory source.
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    records: RwLock<Vec<ExternalRecord>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ExternalRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.insert(record);
        }
        source
    }

    /// Add a record, replacing any record with the same id and type.
    pub fn insert(&self, record: ExternalRecord) {
        let mut records = match self.records.write() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        match records
            .iter_mut()
            .find(|r| r.id == record.id && r.record_type == record.record_type)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Remove every record with `id`. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut records = match self.records.write() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace_all(&self, replacement: Vec<ExternalRecord>) {
        let mut records = match self.records.write() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        *records = replacement;
    }
}

impl DataSource for InMemoryDataSource {
    fn records(&self, record_type: &RecordType) -> Result<Vec<ExternalRecord>, DataSourceError> {
        let records = self
            .records
            .read()
            .map_err(|e| DataSourceError::Unavailable(e.to_string()))?;
        Ok(records
            .iter()
            .filter(|r| r.record_type == record_type.as_str())
            .cloned()
            .collect())
    }

    fn record(
        &self,
        record_type: &RecordType,
        id: &str,
    ) -> Result<Option<ExternalRecord>, DataSourceError> {
        let records = self
            .records
            .read()
            .map_err(|e| DataSourceError::Unavailable(e.to_string()))?;
        Ok(records
            .iter()
            .find(|r| r.id == id && r.record_type == record_type.as_str())
            .cloned())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Records loaded from a JSON file.
///
/// Accepts a JSON array of records or one record per line.
#[derive(Debug)]
pub struct JsonFileDataSource {
    path: PathBuf,
    records: InMemoryDataSource,
}

impl JsonFileDataSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataSourceError> {
        let source = Self {
            path: path.as_ref().to_path_buf(),
            records: InMemoryDataSource::new(),
        };
        source.reload()?;
        Ok(source)
    }

    /// Re-read the file. Returns the number of records loaded.
    pub fn reload(&self) -> Result<usize, DataSourceError> {
        let content = std::fs::read_to_string(&self.path)?;
        let records = parse_records(&content)?;
        let count = records.len();
        self.records.replace_all(records);
        info!(path = ?self.path, count, "Loaded records");
        Ok(count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DataSource for JsonFileDataSource {
    fn records(&self, record_type: &RecordType) -> Result<Vec<ExternalRecord>, DataSourceError> {
        self.records.records(record_type)
    }

    fn record(
        &self,
        record_type: &RecordType,
        id: &str,
    ) -> Result<Option<ExternalRecord>, DataSourceError> {
        self.records.record(record_type, id)
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

/// Parse a JSON array or JSON lines of records.
pub fn parse_records(content: &str) -> Result<Vec<ExternalRecord>, DataSourceError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let records: Vec<ExternalRecord> =
            serde_json::from_str(trimmed).map_err(|e| DataSourceError::Parse(e.to_string()))?;
        for record in &records {
            record
                .validate()
                .map_err(|e| DataSourceError::Parse(e.to_string()))?;
        }
        return Ok(records);
    }

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = ExternalRecord::from_json(line)
            .map_err(|e| DataSourceError::Parse(format!("line {}: {}", line_no + 1, e)))?;
        records.push(record);
    }
    debug!(count = records.len(), "Parsed JSON lines records");
    Ok(records)
}
