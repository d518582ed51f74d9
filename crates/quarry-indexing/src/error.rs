//! Error types for the mutation pipeline.

use quarry_search::{FieldMappingError, SearchError};
use tantivy::TantivyError;
use thiserror::Error;

use crate::source::DataSourceError;

/// Why one mutation could not be applied.
///
/// Only [`ApplyError::Unavailable`] is fatal; the queue halts on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Engine cannot accept writes (IO, lock, dead worker thread)
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Mapping error: {0}")]
    Mapping(#[from] FieldMappingError),

    #[error("Data source error: {0}")]
    DataSource(String),

    /// Engine rejected the operation
    #[error("Engine error: {0}")]
    Engine(String),
}

impl ApplyError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::Unavailable(_))
    }
}

impl From<TantivyError> for ApplyError {
    fn from(err: TantivyError) -> Self {
        match err {
            TantivyError::IoError(_)
            | TantivyError::LockFailure(..)
            | TantivyError::Poisoned
            | TantivyError::OpenDirectoryError(_)
            | TantivyError::OpenWriteError(_)
            | TantivyError::ErrorInThread(_) => ApplyError::Unavailable(err.to_string()),
            other => ApplyError::Engine(other.to_string()),
        }
    }
}

impl From<DataSourceError> for ApplyError {
    fn from(err: DataSourceError) -> Self {
        ApplyError::DataSource(err.to_string())
    }
}

/// Errors surfaced to callers of the mutation queue.
///
/// Clone so one failure can reach a waiter and every observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexingError {
    /// A mutation failed to apply
    #[error("Mutation {sequence} ({mutation}) failed: {cause}")]
    MutationFailed {
        sequence: u64,
        mutation: String,
        cause: ApplyError,
    },

    /// A fatal failure stopped the queue
    #[error("Mutation queue halted at mutation {sequence}: {cause}")]
    Halted { sequence: u64, cause: ApplyError },

    #[error("Timed out waiting for mutation {0}")]
    WaitTimeout(u64),

    #[error("Mutation queue is closed")]
    QueueClosed,

    #[error("Queue worker failed: {0}")]
    Worker(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Data source error: {0}")]
    DataSource(String),
}

impl IndexingError {
    /// The apply failure behind this error, if any.
    pub fn cause(&self) -> Option<&ApplyError> {
        match self {
            IndexingError::MutationFailed { cause, .. } | IndexingError::Halted { cause, .. } => {
                Some(cause)
            }
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexingError::Halted { .. })
            || self.cause().is_some_and(ApplyError::is_fatal)
    }
}

impl From<SearchError> for IndexingError {
    fn from(err: SearchError) -> Self {
        IndexingError::Search(err.to_string())
    }
}

impl From<DataSourceError> for IndexingError {
    fn from(err: DataSourceError) -> Self {
        IndexingError::DataSource(err.to_string())
    }
}
