//! Failure notifications for applied mutations.

use tracing::warn;

use crate::error::IndexingError;

/// One failed mutation (or record skipped inside a rebuild).
#[derive(Debug, Clone)]
pub struct IndexingErrorEvent {
    pub index_id: String,
    /// Queue position of the failed mutation
    pub sequence: u64,
    pub message: String,
    pub error: IndexingError,
    /// Whether the failure halted the queue
    pub fatal: bool,
}

/// Receives every indexing failure. Called from the worker thread.
pub trait ErrorObserver: Send + Sync {
    fn on_error(&self, event: &IndexingErrorEvent);
}

impl<F> ErrorObserver for F
where
    F: Fn(&IndexingErrorEvent) + Send + Sync,
{
    fn on_error(&self, event: &IndexingErrorEvent) {
        self(event)
    }
}

/// Logs failures at warn level.
pub struct LoggingErrorObserver;

impl ErrorObserver for LoggingErrorObserver {
    fn on_error(&self, event: &IndexingErrorEvent) {
        warn!(
            index_id = %event.index_id,
            sequence = event.sequence,
            fatal = event.fatal,
            error = %event.message,
            "Indexing failure"
        );
    }
}
