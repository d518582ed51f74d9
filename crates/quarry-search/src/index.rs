//! Tantivy index management.
//!
//! Handles index creation, opening, and writer/reader construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::IndexSchema;

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Where the index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    /// MmapDirectory at the given path
    Directory(PathBuf),
    /// RAM-only index, gone when dropped
    InMemory,
}

/// Search index configuration
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Identity used by the searcher context registry
    pub index_id: String,
    pub location: IndexLocation,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl SearchIndexConfig {
    pub fn new(index_id: impl Into<String>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_id: index_id.into(),
            location: IndexLocation::Directory(index_path.into()),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn in_memory(index_id: impl Into<String>) -> Self {
        Self {
            index_id: index_id.into(),
            location: IndexLocation::InMemory,
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// Wrapper for Tantivy index with schema access.
pub struct SearchIndex {
    index: Index,
    schema: Arc<IndexSchema>,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Open existing index or create new one.
    ///
    /// An existing on-disk index must match the declared schema.
    pub fn open_or_create(
        config: SearchIndexConfig,
        schema: Arc<IndexSchema>,
    ) -> Result<Self, SearchError> {
        let index = match &config.location {
            IndexLocation::Directory(path) => open_or_create_index(path, &schema)?,
            IndexLocation::InMemory => {
                debug!(index_id = %config.index_id, "Creating in-memory index");
                Index::create_in_ram(schema.schema().clone())
            }
        };

        info!(index_id = %config.index_id, location = ?config.location, "Opened search index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    pub fn index_id(&self) -> &str {
        &self.config.index_id
    }

    /// Get the frozen schema
    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    /// Get the underlying Tantivy index
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Create an IndexWriter with configured memory budget
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let memory_budget = self.config.writer_memory_mb * 1024 * 1024;
        let writer = self.index.writer(memory_budget)?;
        debug!(
            memory_mb = self.config.writer_memory_mb,
            "Created index writer"
        );
        Ok(writer)
    }

    /// Create an IndexReader that only reloads when told to.
    ///
    /// Reloads are driven by the searcher context manager after each
    /// committed batch.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        debug!("Created index reader");
        Ok(reader)
    }

    pub fn location(&self) -> &IndexLocation {
        &self.config.location
    }
}

/// Open an existing index or create a new one.
///
/// Uses MmapDirectory for persistence.
pub fn open_or_create_index(path: &Path, schema: &IndexSchema) -> Result<Index, SearchError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        let index = Index::open_in_dir(path)?;
        schema.verify(&index.schema())?;
        Ok(index)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let index = Index::create_in_dir(path, schema.schema().clone())?;
        Ok(index)
    }
}
