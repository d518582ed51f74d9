//! Serialized mutation queue.
//!
//! Any number of callers enqueue; one blocking worker per index drains the
//! queue in FIFO order and is the only writer to the engine. Each
//! `enqueue` returns a [`DrainTicket`] (the mutation's queue position);
//! waiting on a ticket resolves once that position has been applied and
//! committed, independent of anything enqueued later.
//!
//! Failures go to observers and broadcast subscribers as they happen. The
//! most recent ones are also kept for waiters: `wait_for` reports only its
//! own ticket's failure, `wait_for_drain` the first one up to the tail.
//!
//! Worker loop:
//! 1. take up to `max_batch_size` queued mutations
//! 2. apply them in order (committing first before a `RebuildAll`)
//! 3. commit once, refresh the searcher context for the index
//! 4. publish the last processed position

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quarry_search::SearcherContextManager;
use quarry_types::QueueSettings;

use crate::applier::MutationApplier;
use crate::error::{ApplyError, IndexingError};
use crate::mutation::Mutation;
use crate::observer::{ErrorObserver, IndexingErrorEvent};

/// Default number of mutations committed together.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Failures kept for waiters; older ones are only seen by observers.
const MAX_RETAINED_FAILURES: usize = 256;

/// Configuration for the mutation queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum mutations applied per commit
    pub max_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl QueueConfig {
    /// Set the batch limit. Zero is treated as one.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self::default().with_max_batch_size(settings.max_batch_size)
    }
}

/// Queue position of an enqueued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DrainTicket(u64);

impl DrainTicket {
    /// Position in the queue, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    /// Last queue position the worker finished
    pub processed: u64,
    /// Mutations applied without error
    pub applied: u64,
    /// Failures reported (mutations and skipped rebuild records)
    pub failed: u64,
    /// Successful commits
    pub commits: u64,
    pub halted: bool,
}

impl QueueStats {
    /// Enqueued mutations the worker has not finished.
    pub fn pending(&self) -> u64 {
        self.enqueued.saturating_sub(self.processed)
    }
}

struct Envelope {
    sequence: u64,
    mutation: Mutation,
}

struct Producer {
    sender: mpsc::UnboundedSender<Envelope>,
    next_sequence: u64,
}

/// State shared between the queue handle and its worker.
struct Shared {
    index_id: String,
    applied: AtomicU64,
    failed: AtomicU64,
    commits: AtomicU64,
    failures: Mutex<VecDeque<(u64, IndexingError)>>,
    halted: RwLock<Option<IndexingError>>,
    observers: RwLock<Vec<Arc<dyn ErrorObserver>>>,
    events: broadcast::Sender<IndexingErrorEvent>,
}

impl Shared {
    fn halted(&self) -> Option<IndexingError> {
        match self.halted.read() {
            Ok(halted) => halted.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn failures(&self) -> MutexGuard<'_, VecDeque<(u64, IndexingError)>> {
        match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a failure for waiters and notify observers.
    ///
    /// Only the first failure per sequence is kept, and only the most
    /// recent [`MAX_RETAINED_FAILURES`] sequences.
    fn report(&self, sequence: u64, error: IndexingError, fatal: bool) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.failures();
            if failures.back().map(|(s, _)| *s) != Some(sequence) {
                failures.push_back((sequence, error.clone()));
                if failures.len() > MAX_RETAINED_FAILURES {
                    failures.pop_front();
                }
            }
        }

        let event = IndexingErrorEvent {
            index_id: self.index_id.clone(),
            sequence,
            message: error.to_string(),
            error,
            fatal,
        };
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.on_error(&event);
            }
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn halt(&self, sequence: u64, mutation: String, cause: ApplyError) {
        warn!(index_id = %self.index_id, sequence, error = %cause, "Mutation queue halted");
        {
            let mut halted = match self.halted.write() {
                Ok(halted) => halted,
                Err(poisoned) => poisoned.into_inner(),
            };
            if halted.is_none() {
                *halted = Some(IndexingError::Halted {
                    sequence,
                    cause: cause.clone(),
                });
            }
        }
        self.report(
            sequence,
            IndexingError::MutationFailed {
                sequence,
                mutation,
                cause,
            },
            true,
        );
    }

    /// Remove the failure recorded for exactly `sequence`.
    fn take_own_failure(&self, sequence: u64) -> Option<IndexingError> {
        let mut failures = self.failures();
        let position = failures.iter().position(|(s, _)| *s == sequence)?;
        failures.remove(position).map(|(_, error)| error)
    }

    /// Remove every failure at or before `up_to`, returning the first.
    fn take_failure(&self, up_to: u64) -> Option<IndexingError> {
        let mut failures = self.failures();
        let mut first = None;
        failures.retain(|(sequence, error)| {
            if *sequence > up_to {
                return true;
            }
            if first.is_none() {
                first = Some(error.clone());
            }
            false
        });
        first
    }
}

/// Ordered, single-consumer queue of index mutations.
pub struct MutationQueue {
    shared: Arc<Shared>,
    producer: Mutex<Option<Producer>>,
    last_enqueued: AtomicU64,
    progress: watch::Receiver<u64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MutationQueue {
    /// Start the worker. Must be called from within a Tokio runtime.
    ///
    /// When `contexts` is given, the applier's index is refreshed there
    /// after every successful commit, before waiters are released.
    pub fn start<A>(
        applier: A,
        contexts: Option<Arc<SearcherContextManager>>,
        config: QueueConfig,
    ) -> Self
    where
        A: MutationApplier + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = watch::channel(0u64);
        let (events, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            index_id: applier.index_id().to_string(),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            failures: Mutex::new(VecDeque::new()),
            halted: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
            events,
        });

        let worker = Worker {
            applier: Box::new(applier),
            receiver,
            progress: progress_tx,
            shared: shared.clone(),
            contexts,
            max_batch_size: config.max_batch_size.max(1),
        };
        let handle = tokio::task::spawn_blocking(move || worker.run());

        Self {
            shared,
            producer: Mutex::new(Some(Producer {
                sender,
                next_sequence: 1,
            })),
            last_enqueued: AtomicU64::new(0),
            progress: progress_rx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Index this queue writes to.
    pub fn index_id(&self) -> &str {
        &self.shared.index_id
    }

    /// Append a mutation. Never blocks on processing.
    pub fn enqueue(&self, mutation: Mutation) -> Result<DrainTicket, IndexingError> {
        if let Some(halted) = self.shared.halted() {
            return Err(halted);
        }
        let kind = mutation.kind();
        let target = mutation.target_id().map(str::to_string);
        let mut guard = self
            .producer
            .lock()
            .map_err(|_| IndexingError::QueueClosed)?;
        let producer = guard.as_mut().ok_or(IndexingError::QueueClosed)?;

        let sequence = producer.next_sequence;
        producer
            .sender
            .send(Envelope { sequence, mutation })
            .map_err(|_| IndexingError::QueueClosed)?;
        producer.next_sequence += 1;
        self.last_enqueued.store(sequence, Ordering::SeqCst);

        debug!(
            index_id = %self.shared.index_id,
            sequence,
            kind,
            target = target.as_deref().unwrap_or("*"),
            "Enqueued mutation"
        );
        Ok(DrainTicket(sequence))
    }

    /// Ticket for the most recently enqueued mutation.
    pub fn tail(&self) -> DrainTicket {
        DrainTicket(self.last_enqueued.load(Ordering::SeqCst))
    }

    /// Wait until `ticket`'s position has been applied and committed.
    ///
    /// Fails with the failure of that mutation, if it failed, or with
    /// `Halted` once the queue has stopped. Failures of other mutations
    /// are left for their own waiters.
    pub async fn wait_for(&self, ticket: DrainTicket) -> Result<(), IndexingError> {
        let reached = self.reached(ticket).await;
        self.settle(reached, self.shared.take_own_failure(ticket.0))
    }

    /// Wait for everything enqueued before this call.
    ///
    /// Fails with the first unreported failure up to the tail.
    pub async fn wait_for_drain(&self) -> Result<(), IndexingError> {
        self.drain_to(self.tail()).await
    }

    /// Like [`wait_for_drain`](Self::wait_for_drain), giving up after
    /// `timeout`. Processing carries on regardless.
    pub async fn wait_for_drain_timeout(&self, timeout: Duration) -> Result<(), IndexingError> {
        let ticket = self.tail();
        match tokio::time::timeout(timeout, self.drain_to(ticket)).await {
            Ok(result) => result,
            Err(_) => Err(IndexingError::WaitTimeout(ticket.0)),
        }
    }

    async fn drain_to(&self, ticket: DrainTicket) -> Result<(), IndexingError> {
        let reached = self.reached(ticket).await;
        self.settle(reached, self.shared.take_failure(ticket.0))
    }

    /// Whether the worker got to `ticket` before stopping.
    async fn reached(&self, ticket: DrainTicket) -> bool {
        let mut progress = self.progress.clone();
        let reached = progress
            .wait_for(|processed| *processed >= ticket.0)
            .await
            .is_ok();
        reached
    }

    fn settle(&self, reached: bool, failure: Option<IndexingError>) -> Result<(), IndexingError> {
        if let Some(halted) = self.shared.halted() {
            return Err(halted);
        }
        if let Some(failure) = failure {
            return Err(failure);
        }
        if reached {
            Ok(())
        } else {
            Err(IndexingError::QueueClosed)
        }
    }

    /// Failures still held for waiters.
    pub fn retained_failures(&self) -> usize {
        self.shared.failures().len()
    }

    /// Register an observer called for every failure.
    pub fn add_observer(&self, observer: Arc<dyn ErrorObserver>) {
        match self.shared.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Receive failure events as they happen.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<IndexingErrorEvent> {
        self.shared.events.subscribe()
    }

    /// Whether a fatal error stopped the queue.
    pub fn is_halted(&self) -> bool {
        self.shared.halted().is_some()
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.last_enqueued.load(Ordering::SeqCst),
            processed: *self.progress.borrow(),
            applied: self.shared.applied.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
            commits: self.shared.commits.load(Ordering::SeqCst),
            halted: self.is_halted(),
        }
    }

    /// Stop accepting mutations and wait for the worker to drain.
    pub async fn shutdown(&self) -> Result<(), IndexingError> {
        if let Ok(mut producer) = self.producer.lock() {
            producer.take();
        }
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| IndexingError::Worker(e.to_string()))?;
            info!(index_id = %self.shared.index_id, "Mutation queue shut down");
        }
        Ok(())
    }
}

/// The single consumer. Runs on a blocking thread.
struct Worker {
    applier: Box<dyn MutationApplier>,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    progress: watch::Sender<u64>,
    shared: Arc<Shared>,
    contexts: Option<Arc<SearcherContextManager>>,
    max_batch_size: usize,
}

impl Worker {
    fn run(mut self) {
        info!(
            index_id = %self.shared.index_id,
            applier = self.applier.name(),
            "Mutation queue worker started"
        );

        while let Some(first) = self.receiver.blocking_recv() {
            let mut batch = vec![first];
            while batch.len() < self.max_batch_size {
                match self.receiver.try_recv() {
                    Ok(envelope) => batch.push(envelope),
                    Err(_) => break,
                }
            }
            let last = batch[batch.len() - 1].sequence;

            if self.shared.halted().is_none() {
                self.process(&batch, last);
            } else {
                debug!(dropped = batch.len(), "Queue halted, dropping mutations");
            }
            self.progress.send_replace(last);
        }

        debug!(index_id = %self.shared.index_id, "Mutation queue worker stopped");
    }

    fn process(&mut self, batch: &[Envelope], last: u64) {
        debug!(index_id = %self.shared.index_id, size = batch.len(), last, "Processing batch");
        let mut dirty = false;

        for Envelope { sequence, mutation } in batch {
            let sequence = *sequence;
            let is_rebuild = matches!(mutation, Mutation::RebuildAll);
            if is_rebuild && dirty {
                if !self.commit(sequence) {
                    return;
                }
                dirty = false;
            }

            match self.applier.apply(mutation) {
                Ok(report) => {
                    self.shared.applied.fetch_add(1, Ordering::SeqCst);
                    for failure in report.failures {
                        self.shared.report(
                            sequence,
                            IndexingError::MutationFailed {
                                sequence,
                                mutation: format!("{} record {}", mutation, failure.id),
                                cause: failure.error,
                            },
                            false,
                        );
                    }
                    dirty = true;
                }
                Err(cause) if cause.is_fatal() => {
                    self.shared.halt(sequence, mutation.to_string(), cause);
                    self.discard();
                    return;
                }
                Err(cause) => {
                    if is_rebuild {
                        // Earlier work is already committed; drop the partial rebuild
                        if let Err(e) = self.applier.rollback() {
                            self.shared.halt(sequence, "rollback".to_string(), e);
                            return;
                        }
                        dirty = false;
                    }
                    self.shared.report(
                        sequence,
                        IndexingError::MutationFailed {
                            sequence,
                            mutation: mutation.to_string(),
                            cause,
                        },
                        false,
                    );
                }
            }
        }

        if dirty {
            self.commit(last);
        }
    }

    /// Commit and refresh readers. A failed commit halts the queue.
    fn commit(&mut self, sequence: u64) -> bool {
        match self.applier.commit() {
            Ok(opstamp) => {
                self.shared.commits.fetch_add(1, Ordering::SeqCst);
                debug!(index_id = %self.shared.index_id, sequence, opstamp, "Batch committed");
                self.refresh();
                true
            }
            Err(cause) => {
                self.shared.halt(sequence, "commit".to_string(), cause);
                self.discard();
                false
            }
        }
    }

    fn refresh(&self) {
        let Some(contexts) = &self.contexts else {
            return;
        };
        match contexts.refresh(&self.shared.index_id) {
            Ok(swapped) => debug!(index_id = %self.shared.index_id, swapped, "Searcher context refreshed"),
            Err(e) => warn!(index_id = %self.shared.index_id, error = %e, "Failed to refresh searcher context"),
        }
    }

    fn discard(&mut self) {
        if let Err(e) = self.applier.rollback() {
            warn!(index_id = %self.shared.index_id, error = %e, "Rollback after halt failed");
        }
    }
}
