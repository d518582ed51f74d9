//! Record indexer facade.
//!
//! Wires one index, its data source, the shared searcher context
//! manager and a mutation queue together.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use quarry_search::{
    search, IndexSchema, SearchCriteria, SearchError, SearchIndex, SearchOptions, SearchResults,
    SearcherContextManager, SearcherHandle,
};
use quarry_types::{ExternalRecord, RecordType};

use crate::applier::IndexWriterAdapter;
use crate::error::IndexingError;
use crate::mutation::Mutation;
use crate::observer::{ErrorObserver, IndexingErrorEvent, LoggingErrorObserver};
use crate::queue::{DrainTicket, MutationQueue, QueueConfig, QueueStats};
use crate::rebuild::{LoggingProgressCallback, RebuildConfig};
use crate::source::DataSource;

/// Configuration for [`RecordIndexer`].
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub queue: QueueConfig,
    pub rebuild: RebuildConfig,
    /// Hits returned when the caller does not give a limit
    pub default_limit: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            rebuild: RebuildConfig::default(),
            default_limit: 10,
        }
    }
}

impl IndexerConfig {
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_rebuild(mut self, rebuild: RebuildConfig) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }
}

/// Indexes records from a data source and serves snapshot searches.
pub struct RecordIndexer {
    index: SearchIndex,
    source: Arc<dyn DataSource>,
    contexts: Arc<SearcherContextManager>,
    queue: MutationQueue,
    default_limit: usize,
}

impl RecordIndexer {
    /// Take the index writer and start the queue worker.
    ///
    /// Registers the index with `contexts` unless already registered.
    /// Must be called from within a Tokio runtime.
    pub fn open(
        index: SearchIndex,
        source: Arc<dyn DataSource>,
        contexts: Arc<SearcherContextManager>,
        config: IndexerConfig,
    ) -> Result<Self, IndexingError> {
        if !contexts.is_registered(index.index_id()) {
            contexts.register_index(&index)?;
        }

        let adapter = IndexWriterAdapter::new(&index, source.clone())?
            .with_rebuild_config(config.rebuild.clone())
            .with_progress(Box::new(LoggingProgressCallback::new(
                config.rebuild.report_every,
            )));
        let queue = MutationQueue::start(adapter, Some(contexts.clone()), config.queue);
        queue.add_observer(Arc::new(LoggingErrorObserver));

        info!(
            index_id = %index.index_id(),
            source = source.name(),
            fields = index.schema().declared_len(),
            "Record indexer ready"
        );

        Ok(Self {
            index,
            source,
            contexts,
            queue,
            default_limit: config.default_limit,
        })
    }

    pub fn index_id(&self) -> &str {
        self.index.index_id()
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        self.index.schema()
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    pub fn contexts(&self) -> &Arc<SearcherContextManager> {
        &self.contexts
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Queue a full rebuild from the data source.
    pub fn rebuild_index(&self) -> Result<DrainTicket, IndexingError> {
        self.queue.enqueue(Mutation::RebuildAll)
    }

    /// Queue an upsert of `record`.
    pub fn reindex_record(
        &self,
        record: ExternalRecord,
        record_type: RecordType,
    ) -> Result<DrainTicket, IndexingError> {
        self.queue.enqueue(Mutation::upsert(record, record_type))
    }

    /// Queue a reindex of `id` from the data source.
    pub fn reindex_by_id(
        &self,
        id: &str,
        record_type: RecordType,
    ) -> Result<DrainTicket, IndexingError> {
        self.queue.enqueue(Mutation::reindex(id, record_type))
    }

    pub fn delete_record(&self, id: &str) -> Result<DrainTicket, IndexingError> {
        self.queue.enqueue(Mutation::delete(id))
    }

    /// Wait for every mutation queued so far.
    pub async fn wait_for_changes(&self) -> Result<(), IndexingError> {
        self.queue.wait_for_drain().await
    }

    pub async fn wait_for(&self, ticket: DrainTicket) -> Result<(), IndexingError> {
        self.queue.wait_for(ticket).await
    }

    /// Current snapshot of the index.
    pub fn searcher_context(&self) -> Result<SearcherHandle, IndexingError> {
        Ok(self.contexts.acquire(self.index_id())?)
    }

    /// Empty criteria over this index's schema.
    pub fn criteria(&self) -> SearchCriteria {
        SearchCriteria::new(self.schema().clone())
    }

    /// Compile and run `criteria` on the current snapshot.
    pub fn search(
        &self,
        criteria: &SearchCriteria,
        limit: Option<usize>,
    ) -> Result<SearchResults, IndexingError> {
        let query = criteria.compile().map_err(SearchError::from)?;
        let handle = self.searcher_context()?;
        let options = SearchOptions::new().with_limit(limit.unwrap_or(self.default_limit));
        Ok(search(&handle, &query, options)?)
    }

    pub fn add_observer(&self, observer: Arc<dyn ErrorObserver>) {
        self.queue.add_observer(observer);
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<IndexingErrorEvent> {
        self.queue.subscribe_errors()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Drain the queue and stop the worker. Contexts stay open.
    pub async fn shutdown(&self) -> Result<(), IndexingError> {
        self.queue.shutdown().await
    }
}
