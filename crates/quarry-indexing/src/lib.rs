//! Write side of the record index.
//!
//! Mutations flow through a single FIFO queue whose worker is the only
//! holder of the tantivy writer. Callers get a [`DrainTicket`] per
//! mutation and can wait until everything up to it is committed and
//! visible to new searcher contexts.
//!
//! ## Key Components
//!
//! - [`RecordIndexer`]: Facade over index, data source, queue and contexts
//! - [`MutationQueue`]: Ordered single-writer queue with drain waits
//! - [`MutationApplier`]: Seam between the worker and the engine
//! - [`IndexWriterAdapter`]: Tantivy applier
//! - [`DataSource`]: Where rebuilds and reindex-by-id read records from
//! - [`ErrorObserver`]: Notified of every failed mutation
//!
//! ## Example
//!
//! ```ignore
//! let indexer = RecordIndexer::open(index, source, contexts, IndexerConfig::default())?;
//! indexer.rebuild_index()?;
//! indexer.wait_for_changes().await?;
//!
//! let criteria = indexer.criteria().field("Title", "apple");
//! let results = indexer.search(&criteria, None)?;
//! ```

pub mod applier;
pub mod error;
pub mod indexer;
pub mod mutation;
pub mod observer;
pub mod queue;
pub mod rebuild;
pub mod source;

pub use applier::{ApplyReport, IndexWriterAdapter, MutationApplier, RecordFailure};
pub use error::{ApplyError, IndexingError};
pub use indexer::{IndexerConfig, RecordIndexer};
pub use mutation::Mutation;
pub use observer::{ErrorObserver, IndexingErrorEvent, LoggingErrorObserver};
pub use queue::{DrainTicket, MutationQueue, QueueConfig, QueueStats, DEFAULT_MAX_BATCH_SIZE};
pub use rebuild::{
    rebuild_index, LoggingProgressCallback, NoOpProgressCallback, ProgressCallback, RebuildConfig,
    RebuildProgress, RebuildResult,
};
pub use source::{DataSource, DataSourceError, InMemoryDataSource, JsonFileDataSource};
