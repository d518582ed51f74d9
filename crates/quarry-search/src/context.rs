//! Searcher context lifecycle.
//!
//! A [`SearcherContext`] wraps one point-in-time tantivy `Searcher` plus a
//! reference count. Readers get a [`SearcherHandle`] from
//! [`SearcherContextManager::acquire`]; dropping the handle releases it.
//!
//! The manager keeps, per index, the current context and every context it
//! ever handed out. `refresh` swaps the current pointer after a committed
//! write; superseded contexts keep serving their readers and are closed
//! once the last handle goes away. `shutdown` closes everything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tantivy::{Index, IndexReader, Searcher};
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::index::SearchIndex;

/// One consistent snapshot of an index plus its reference count.
#[derive(Debug)]
pub struct SearcherContext {
    id: u64,
    index_id: String,
    /// Commit opstamp the snapshot reflects
    opstamp: u64,
    searcher: Mutex<Option<Searcher>>,
    refs: AtomicUsize,
    superseded: AtomicBool,
}

impl SearcherContext {
    fn new(id: u64, index_id: &str, opstamp: u64, searcher: Searcher) -> Self {
        Self {
            id,
            index_id: index_id.to_string(),
            opstamp,
            searcher: Mutex::new(Some(searcher)),
            refs: AtomicUsize::new(0),
            superseded: AtomicBool::new(false),
        }
    }

    /// Unique within the registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index the snapshot belongs to.
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Commit opstamp this snapshot was opened at.
    pub fn opstamp(&self) -> u64 {
        self.opstamp
    }

    /// Handles currently out.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Whether this is still the current context for its index.
    pub fn is_current(&self) -> bool {
        !self.superseded.load(Ordering::SeqCst)
    }

    /// Whether the engine resources have been released.
    pub fn is_closed(&self) -> bool {
        self.searcher.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    fn searcher(&self) -> Result<Searcher, SearchError> {
        let guard = self
            .searcher
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        guard.clone().ok_or(SearchError::ContextClosed(self.id))
    }

    fn retain(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.superseded.load(Ordering::SeqCst) {
            self.close();
        }
    }

    fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
        if self.refs.load(Ordering::SeqCst) == 0 {
            self.close();
        }
    }

    fn close(&self) {
        match self.searcher.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    debug!(index_id = %self.index_id, context = self.id, "Closed searcher context");
                }
            }
            Err(e) => warn!(context = self.id, error = %e, "Searcher context lock poisoned"),
        }
    }
}

/// Scoped read handle. Released when dropped.
#[derive(Debug)]
pub struct SearcherHandle {
    context: Arc<SearcherContext>,
}

impl SearcherHandle {
    fn new(context: Arc<SearcherContext>) -> Self {
        context.retain();
        Self { context }
    }

    /// The context this handle keeps alive.
    pub fn context(&self) -> &Arc<SearcherContext> {
        &self.context
    }

    /// The snapshot searcher. Fails once the registry has been torn down.
    pub fn searcher(&self) -> Result<Searcher, SearchError> {
        self.context.searcher()
    }

    /// Number of live documents in the snapshot.
    pub fn num_docs(&self) -> Result<u64, SearchError> {
        let searcher = self.searcher()?;
        Ok(searcher
            .segment_readers()
            .iter()
            .map(|r| r.num_docs() as u64)
            .sum())
    }

    /// Names of all fields in the snapshot's schema.
    pub fn field_names(&self) -> Result<Vec<String>, SearchError> {
        let searcher = self.searcher()?;
        Ok(searcher
            .schema()
            .fields()
            .map(|(_, entry)| entry.name().to_string())
            .collect())
    }

    /// Commit opstamp of the snapshot.
    pub fn opstamp(&self) -> u64 {
        self.context.opstamp()
    }

    /// Explicit release; same as dropping the handle.
    pub fn release(self) {}
}

impl Clone for SearcherHandle {
    fn clone(&self) -> Self {
        Self::new(self.context.clone())
    }
}

impl Drop for SearcherHandle {
    fn drop(&mut self) {
        self.context.release();
    }
}

struct IndexEntry {
    index: Index,
    reader: IndexReader,
    /// Held while a new snapshot is opened for this index
    opening: Mutex<()>,
    state: Mutex<EntryState>,
}

#[derive(Default)]
struct EntryState {
    current: Option<Arc<SearcherContext>>,
    /// Every context handed out, for teardown
    issued: Vec<Weak<SearcherContext>>,
}

impl IndexEntry {
    fn state(&self) -> Result<MutexGuard<'_, EntryState>, SearchError> {
        self.state
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    /// Handle on the current context, retained under the state lock so a
    /// concurrent swap cannot close it first.
    fn current_handle(&self) -> Result<Option<SearcherHandle>, SearchError> {
        Ok(self.state()?.current.clone().map(SearcherHandle::new))
    }

    /// Reload the reader and wrap its newest searcher.
    fn open_context(&self, id: u64, index_id: &str) -> Result<Arc<SearcherContext>, SearchError> {
        let opstamp = self.index.load_metas()?.opstamp;
        self.reader.reload()?;
        Ok(Arc::new(SearcherContext::new(
            id,
            index_id,
            opstamp,
            self.reader.searcher(),
        )))
    }
}

/// Registry mapping index identity to its current searcher context.
///
/// One manager per process is the usual wiring; it is passed explicitly
/// to the components that need it. The registry lock only guards the map;
/// snapshots are opened under a per-index lock.
pub struct SearcherContextManager {
    entries: RwLock<HashMap<String, Arc<IndexEntry>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for SearcherContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SearcherContextManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register an index. Its first context is opened lazily.
    pub fn register_index(&self, index: &SearchIndex) -> Result<(), SearchError> {
        self.ensure_open()?;
        let reader = index.reader()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        if entries.contains_key(index.index_id()) {
            return Err(SearchError::IndexAlreadyRegistered(
                index.index_id().to_string(),
            ));
        }
        entries.insert(
            index.index_id().to_string(),
            Arc::new(IndexEntry {
                index: index.index().clone(),
                reader,
                opening: Mutex::new(()),
                state: Mutex::new(EntryState::default()),
            }),
        );
        info!(index_id = %index.index_id(), "Registered index for searcher contexts");
        Ok(())
    }

    /// Whether `index_id` has been registered.
    pub fn is_registered(&self, index_id: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(index_id))
            .unwrap_or(false)
    }

    /// Hand out the current snapshot for `index_id`.
    ///
    /// Never waits for a refresh; opens the first context on demand.
    pub fn acquire(&self, index_id: &str) -> Result<SearcherHandle, SearchError> {
        self.ensure_open()?;
        let entry = self.entry(index_id)?;
        if let Some(handle) = entry.current_handle()? {
            return Ok(handle);
        }

        let _opening = entry
            .opening
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        if let Some(handle) = entry.current_handle()? {
            return Ok(handle);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let context = entry.open_context(id, index_id)?;
        let handle = SearcherHandle::new(context.clone());
        self.install(&entry, &context)?;
        debug!(index_id, context = context.id(), "Opened first searcher context");
        Ok(handle)
    }

    /// Explicit release; same as dropping the handle.
    pub fn release(&self, handle: SearcherHandle) {
        drop(handle);
    }

    /// Swap in a snapshot of the latest commit.
    ///
    /// Returns `false` when the current snapshot already reflects the
    /// latest commit. Handles on the previous context stay valid, and
    /// `acquire` keeps returning the previous context until the swap.
    pub fn refresh(&self, index_id: &str) -> Result<bool, SearchError> {
        self.ensure_open()?;
        let entry = self.entry(index_id)?;
        let _opening = entry
            .opening
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        let committed = entry.index.load_metas()?.opstamp;
        let current = entry.state()?.current.as_ref().map(|c| c.opstamp());
        if current == Some(committed) {
            debug!(index_id, opstamp = committed, "Searcher context already current");
            return Ok(false);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let context = entry.open_context(id, index_id)?;
        if let Some(previous) = self.install(&entry, &context)? {
            previous.supersede();
        }
        debug!(
            index_id,
            context = context.id(),
            opstamp = context.opstamp(),
            "Refreshed searcher context"
        );
        Ok(true)
    }

    /// Opstamp of the current context, if one is open.
    pub fn current_opstamp(&self, index_id: &str) -> Option<u64> {
        let entry = self.entry(index_id).ok()?;
        let state = entry.state().ok()?;
        state.current.as_ref().map(|c| c.opstamp())
    }

    /// Number of contexts for `index_id` that still hold engine resources.
    pub fn open_context_count(&self, index_id: &str) -> usize {
        let Ok(entry) = self.entry(index_id) else {
            return 0;
        };
        let Ok(state) = entry.state() else {
            return 0;
        };
        state
            .issued
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .count()
    }

    /// Whether `shutdown` has run.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every context regardless of outstanding handles.
    ///
    /// Handles kept past this point fail with `ContextClosed`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut closed = 0usize;
        for (index_id, entry) in entries.drain() {
            let mut state = match entry.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.current = None;
            for context in state.issued.drain(..).filter_map(|w| w.upgrade()) {
                if context.ref_count() > 0 {
                    warn!(
                        index_id = %index_id,
                        context = context.id(),
                        refs = context.ref_count(),
                        "Closing searcher context with outstanding handles"
                    );
                }
                context.close();
                closed += 1;
            }
        }
        info!(closed, "Searcher context registry shut down");
    }

    fn entry(&self, index_id: &str) -> Result<Arc<IndexEntry>, SearchError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        entries
            .get(index_id)
            .cloned()
            .ok_or_else(|| SearchError::UnknownIndex(index_id.to_string()))
    }

    /// Make `context` current for `entry`, returning the one it replaces.
    fn install(
        &self,
        entry: &IndexEntry,
        context: &Arc<SearcherContext>,
    ) -> Result<Option<Arc<SearcherContext>>, SearchError> {
        let mut state = entry.state()?;
        // Shutdown closes contexts under this lock, so late arrivals close here
        if let Err(e) = self.ensure_open() {
            context.close();
            return Err(e);
        }
        state.issued.retain(|w| w.strong_count() > 0);
        state.issued.push(Arc::downgrade(context));
        Ok(state.current.replace(context.clone()))
    }

    fn ensure_open(&self) -> Result<(), SearchError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SearchError::RegistryClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for SearcherContextManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SearchIndexConfig;
    use crate::schema::{FieldDefinition, IndexSchema, SchemaRegistry};
    use crate::DocumentMapper;
    use quarry_types::{ExternalRecord, RecordType};

    fn setup() -> (SearchIndex, SearcherContextManager) {
        let mut registry = SchemaRegistry::new();
        registry
            .register_record_type(RecordType::new("Documents"))
            .unwrap();
        registry.register(FieldDefinition::new("Title")).unwrap();
        let schema: Arc<IndexSchema> = Arc::new(registry.freeze().unwrap());
        let index =
            SearchIndex::open_or_create(SearchIndexConfig::in_memory("docs"), schema).unwrap();
        let manager = SearcherContextManager::new();
        manager.register_index(&index).unwrap();
        (index, manager)
    }

    fn add_docs(index: &SearchIndex, ids: &[&str]) {
        let mapper = DocumentMapper::new(index.schema().clone());
        let mut writer = index.writer().unwrap();
        let rt = RecordType::new("Documents");
        for id in ids {
            let record = ExternalRecord::new(*id, "Documents").with_field("Title", "t");
            writer.add_document(mapper.map_to_doc(&record, &rt).unwrap()).unwrap();
        }
        writer.commit().unwrap();
    }

    #[test]
    fn test_acquire_is_lazy_and_shared() {
        let (_index, manager) = setup();
        assert_eq!(manager.open_context_count("docs"), 0);

        let h1 = manager.acquire("docs").unwrap();
        let h2 = manager.acquire("docs").unwrap();
        assert!(Arc::ptr_eq(h1.context(), h2.context()));
        assert_eq!(h1.context().ref_count(), 2);
        assert_eq!(h1.num_docs().unwrap(), 0);

        manager.release(h2);
        assert_eq!(h1.context().ref_count(), 1);
        assert_eq!(manager.open_context_count("docs"), 1);
    }

    #[test]
    fn test_unknown_index() {
        let (_index, manager) = setup();
        assert!(matches!(
            manager.acquire("nope"),
            Err(SearchError::UnknownIndex(_))
        ));
        assert!(matches!(
            manager.refresh("nope"),
            Err(SearchError::UnknownIndex(_))
        ));
    }

    #[test]
    fn test_register_twice_rejected() {
        let (index, manager) = setup();
        assert!(manager.is_registered("docs"));
        assert!(matches!(
            manager.register_index(&index),
            Err(SearchError::IndexAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_refresh_without_commit_is_noop() {
        let (_index, manager) = setup();
        let h1 = manager.acquire("docs").unwrap();
        assert!(!manager.refresh("docs").unwrap());
        let h2 = manager.acquire("docs").unwrap();
        assert!(Arc::ptr_eq(h1.context(), h2.context()));
    }

    #[test]
    fn test_snapshot_isolation_across_refresh() {
        let (index, manager) = setup();
        add_docs(&index, &["1", "2"]);

        let before = manager.acquire("docs").unwrap();
        assert_eq!(before.num_docs().unwrap(), 2);

        add_docs(&index, &["3"]);
        assert!(manager.refresh("docs").unwrap());

        let after = manager.acquire("docs").unwrap();
        assert_eq!(before.num_docs().unwrap(), 2);
        assert_eq!(after.num_docs().unwrap(), 3);
        assert!(!before.context().is_current());
        assert!(after.context().is_current());
    }

    #[test]
    fn test_superseded_context_closed_on_last_release() {
        let (index, manager) = setup();
        let old = manager.acquire("docs").unwrap();
        let old_clone = old.clone();
        let context = old.context().clone();

        add_docs(&index, &["1"]);
        manager.refresh("docs").unwrap();
        assert!(!context.is_closed());

        drop(old);
        assert!(!context.is_closed());
        drop(old_clone);
        assert!(context.is_closed());
        assert_eq!(manager.open_context_count("docs"), 1);
    }

    #[test]
    fn test_current_context_survives_zero_refs() {
        let (_index, manager) = setup();
        let handle = manager.acquire("docs").unwrap();
        let context = handle.context().clone();
        drop(handle);
        assert_eq!(context.ref_count(), 0);
        assert!(!context.is_closed());
    }

    #[test]
    fn test_unreferenced_context_closed_on_refresh() {
        let (index, manager) = setup();
        let context = manager.acquire("docs").unwrap().context().clone();
        add_docs(&index, &["1"]);
        manager.refresh("docs").unwrap();
        assert!(context.is_closed());
    }

    #[test]
    fn test_shutdown_closes_outstanding_handles() {
        let (index, manager) = setup();
        let old = manager.acquire("docs").unwrap();
        add_docs(&index, &["1"]);
        manager.refresh("docs").unwrap();
        let current = manager.acquire("docs").unwrap();

        manager.shutdown();
        assert!(manager.is_shut_down());
        assert!(matches!(old.searcher(), Err(SearchError::ContextClosed(_))));
        assert!(matches!(
            current.num_docs(),
            Err(SearchError::ContextClosed(_))
        ));
        assert!(matches!(
            manager.acquire("docs"),
            Err(SearchError::RegistryClosed)
        ));
    }

    #[test]
    fn test_acquire_does_not_wait_for_refresh() {
        let (index, manager) = setup();
        let manager = Arc::new(manager);
        let before = manager.acquire("docs").unwrap().opstamp();
        add_docs(&index, &["1"]);

        // Stand in for a refresh that is still opening its snapshot
        let entry = manager.entry("docs").unwrap();
        let refreshing = entry.opening.lock().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let reader = manager.clone();
        std::thread::spawn(move || {
            let handle = reader.acquire("docs");
            tx.send(handle.map(|h| h.opstamp())).unwrap();
        });
        let acquired = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("acquire blocked behind a refresh");
        assert_eq!(acquired.unwrap(), before);

        drop(refreshing);
        assert!(manager.refresh("docs").unwrap());
        assert!(manager.acquire("docs").unwrap().opstamp() > before);
    }

    #[test]
    fn test_refresh_after_shutdown_rejected() {
        let (index, manager) = setup();
        let _handle = manager.acquire("docs").unwrap();
        add_docs(&index, &["1"]);
        manager.shutdown();
        assert!(matches!(
            manager.refresh("docs"),
            Err(SearchError::RegistryClosed)
        ));
        assert_eq!(manager.current_opstamp("docs"), None);
    }

    #[test]
    fn test_field_names_include_reserved() {
        let (_index, manager) = setup();
        let handle = manager.acquire("docs").unwrap();
        let names = handle.field_names().unwrap();
        assert_eq!(names.len(), 3);
        assert!(names.iter().any(|n| n == crate::NODE_ID_FIELD));
        assert!(names.iter().any(|n| n == crate::RECORD_TYPE_FIELD));
    }
}
