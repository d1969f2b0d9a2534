//! The datastore facade.

mod options;
mod state;

pub use options::{RemoveOptions, UpdateOptions, UpdateResult};
pub use state::{CREATED_AT, UPDATED_AT};

use crate::config::{clamp_interval, Config};
use crate::cursor::Cursor;
use crate::error::{CoreError, CoreResult};
use crate::executor::Executor;
use crate::index::IndexOptions;
use crate::matcher::DocumentMatcher;
use crate::persistence::Persistence;
use emberdb_codec::{Document, Map};
use emberdb_storage::{FileBackend, InMemoryBackend, LogBackend};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use state::{Context, State};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// State shared between the handle, its cursors and the compaction thread.
pub(crate) struct Shared {
    executor: Executor,
    state: Mutex<State>,
    persistence: Persistence,
    matcher: Arc<dyn DocumentMatcher>,
    timestamp_data: bool,
    rng_seed: Option<u64>,
    filename: Option<PathBuf>,
    compactions: AtomicU64,
}

impl Shared {
    fn context(&self) -> Context<'_> {
        Context {
            persistence: &self.persistence,
            matcher: self.matcher.as_ref(),
            timestamp_data: self.timestamp_data,
        }
    }

    /// Runs `op` on the state as the next task of the queue.
    pub(crate) fn run<T>(
        &self,
        op: impl FnOnce(&mut State, &Context<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.executor.run(|| {
            let mut state = self.state.lock();
            op(&mut state, &self.context())
        })
    }

    pub(crate) fn matcher(&self) -> &dyn DocumentMatcher {
        self.matcher.as_ref()
    }

    fn compact(&self) -> CoreResult<()> {
        self.run(|state, ctx| state.compact(ctx))?;
        self.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Replays the logs into a fresh state and swaps it in.
    ///
    /// Queued tasks wait until the load finishes. On failure the current
    /// state is kept.
    fn load(&self) -> CoreResult<()> {
        self.executor.pause();
        let result = self.executor.run_forced(|| {
            let loaded = self.persistence.load()?;
            let (documents, corrupt) = (loaded.documents.len(), loaded.corrupt_lines);
            let fresh = State::from_loaded(loaded, self.rng_seed)?;
            fresh.check_invariants()?;
            fresh.compact(&self.context())?;
            *self.state.lock() = fresh;
            info!(documents, corrupt, "loaded datastore");
            Ok(())
        });
        self.executor.resume();
        if result.is_ok() {
            self.compactions.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Background thread compacting the logs on a fixed period.
struct AutoCompactor {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl AutoCompactor {
    fn start(shared: &Arc<Shared>, interval: Duration) -> CoreResult<Self> {
        let weak: Weak<Shared> = Arc::downgrade(shared);
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = stop.clone();

        let handle = thread::Builder::new()
            .name("emberdb-compaction".to_string())
            .spawn(move || {
                let (stopped, wake) = &*signal;
                loop {
                    let deadline = Instant::now() + interval;
                    let mut guard = stopped.lock();
                    while !*guard {
                        if wake.wait_until(&mut guard, deadline).timed_out() {
                            break;
                        }
                    }
                    if *guard {
                        break;
                    }
                    drop(guard);

                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    if let Err(e) = shared.compact() {
                        warn!(error = %e, "automatic compaction failed");
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        let (stopped, wake) = &*self.stop;
        *stopped.lock() = true;
        wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("compaction thread panicked");
            }
        }
    }
}

impl Drop for AutoCompactor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// An embedded document store.
///
/// `Datastore` keeps every document in memory, indexed by `_id` and by any
/// secondary index, and persists changes as lines appended to a data log
/// and an index log. All operations are serialized through one FIFO queue.
///
/// # Opening a Datastore
///
/// ```rust,ignore
/// use emberdb_core::{Config, Datastore, IndexOptions, UpdateOptions};
///
/// let store = Datastore::open(Config::new().filename("people.db"))?;
/// store.ensure_index(IndexOptions::new("email").unique())?;
///
/// let ann = store.insert(doc)?;
/// let adults = store.find(&query).sort("age", SortOrder::Ascending).exec()?;
/// ```
///
/// # In-Memory Datastores
///
/// Without a filename nothing touches the disk:
///
/// ```rust,ignore
/// let store = Datastore::in_memory()?;
/// ```
pub struct Datastore {
    shared: Arc<Shared>,
    compactor: Mutex<Option<AutoCompactor>>,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("filename", &self.shared.filename)
            .field("timestamp_data", &self.shared.timestamp_data)
            .field("persistence", &self.shared.persistence)
            .finish_non_exhaustive()
    }
}

impl Datastore {
    /// Opens a datastore and loads its logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the transform pair
    /// does not round-trip, the logs cannot be read, or too many lines are
    /// corrupt.
    pub fn open(config: Config) -> CoreResult<Self> {
        config.validate()?;

        let backend: Arc<dyn LogBackend> = match (&config.backend, &config.filename) {
            (Some(backend), _) => backend.clone(),
            (None, Some(path)) => Arc::new(
                FileBackend::open(path)?.lock_policy(config.lock_retries, config.lock_retry_delay),
            ),
            (None, None) => Arc::new(InMemoryBackend::new()),
        };

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let persistence = Persistence::new(
            backend,
            config.transform.clone(),
            config.corrupt_alert_threshold,
            &mut rng,
        )?;
        persistence.init()?;

        let shared = Arc::new(Shared {
            executor: Executor::new(),
            state: Mutex::new(State::new(config.rng_seed)),
            persistence,
            matcher: config.matcher.clone(),
            timestamp_data: config.timestamp_data,
            rng_seed: config.rng_seed,
            filename: config.filename.clone(),
            compactions: AtomicU64::new(0),
        });
        shared.load()?;

        let store = Self {
            shared,
            compactor: Mutex::new(None),
        };
        if let Some(interval) = config.effective_compaction_interval() {
            store.set_auto_compaction_interval(interval)?;
        }
        info!(filename = ?config.filename, "opened datastore");
        Ok(store)
    }

    /// Opens an empty in-memory datastore.
    ///
    /// # Errors
    ///
    /// Fails only if the default configuration is rejected.
    pub fn in_memory() -> CoreResult<Self> {
        Self::open(Config::new())
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Returns the data log location, or `None` in memory.
    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.shared.filename.as_deref()
    }

    /// Creates an index over `options.field_name`. Indexing an already
    /// indexed field does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueViolation`](crate::CoreError::UniqueViolation)
    /// if existing documents break a unique constraint, in which case no
    /// index is created.
    pub fn ensure_index(&self, options: IndexOptions) -> CoreResult<()> {
        self.shared
            .run(|state, ctx| state.ensure_index(ctx, options))
            .map(|_| ())
    }

    /// Removes the index over `field`.
    ///
    /// # Errors
    ///
    /// Returns an error for the `_id` index or if the directive cannot be
    /// logged.
    pub fn remove_index(&self, field: &str) -> CoreResult<()> {
        self.shared
            .run(|state, ctx| state.remove_index(ctx, field))
            .map(|_| ())
    }

    /// Names of every index, `_id` included.
    pub fn index_names(&self) -> CoreResult<Vec<String>> {
        self.shared.run(|state, _| Ok(state.index_names()))
    }

    /// Inserts one document and returns a copy of what was stored.
    ///
    /// A missing `_id` is generated. With timestamps enabled, missing
    /// `createdAt`/`updatedAt` fields are set to now.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed document or a unique
    /// violation. Nothing is stored in either case.
    pub fn insert(&self, doc: Document) -> CoreResult<Document> {
        let mut inserted = self.insert_many(vec![doc])?;
        inserted
            .pop()
            .ok_or_else(|| CoreError::invalid_operation("insert returned no document"))
    }

    /// Inserts a batch. Either every document is stored or none is.
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn insert_many(&self, docs: Vec<Document>) -> CoreResult<Vec<Document>> {
        self.shared.run(|state, ctx| state.insert(ctx, docs))
    }

    /// Starts a query. Nothing runs until the cursor is executed.
    #[must_use]
    pub fn find(&self, query: &Map) -> Cursor<'_> {
        Cursor::new(self, query.clone())
    }

    /// Returns a copy of the first document matching `query`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query.
    pub fn find_one(&self, query: &Map) -> CoreResult<Option<Document>> {
        Ok(self.find(query).limit(1).exec()?.pop())
    }

    /// Counts the documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query.
    pub fn count(&self, query: &Map) -> CoreResult<usize> {
        self.find(query).count()
    }

    /// Updates the documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query or update, or a
    /// unique violation. No document is changed in either case.
    pub fn update(
        &self,
        query: &Map,
        update: &Map,
        options: UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        self.shared
            .run(|state, ctx| state.update(ctx, query, update, options))
    }

    /// Removes the documents matching `query` and returns how many.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query or a storage error.
    pub fn remove(&self, query: &Map, options: RemoveOptions) -> CoreResult<usize> {
        self.shared
            .run(|state, ctx| state.remove(ctx, query, options.multi))
    }

    /// Copies of the documents an index lookup returns for `query`, before
    /// matching. Expired documents are removed first unless `skip_expiry`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns a storage error if removing expired documents fails.
    pub fn get_candidates(&self, query: &Map, skip_expiry: bool) -> CoreResult<Vec<Document>> {
        self.shared.run(|state, ctx| {
            let handles = state.get_candidates(ctx, query, skip_expiry)?;
            Ok(handles
                .into_iter()
                .filter_map(|h| state.document(h).cloned())
                .collect())
        })
    }

    /// Copies of every document, in `_id` order.
    pub fn get_all_data(&self) -> CoreResult<Vec<Document>> {
        self.shared
            .run(|state, _| Ok(state.documents().into_iter().cloned().collect()))
    }

    /// Number of documents, expired ones included.
    pub fn len(&self) -> CoreResult<usize> {
        self.shared.run(|state, _| Ok(state.len()))
    }

    /// Returns true if the store holds no document.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Checks the structural invariants of every index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TreeInvariant`](crate::CoreError::TreeInvariant)
    /// describing the first violation found.
    pub fn check_indexes(&self) -> CoreResult<()> {
        self.shared.run(|state, _| state.check_invariants())
    }

    /// Discards the in-memory state and replays the logs.
    ///
    /// Operations submitted meanwhile wait and then run against the
    /// reloaded state.
    ///
    /// # Errors
    ///
    /// On failure the previous state is kept and the error is returned.
    pub fn load_database(&self) -> CoreResult<()> {
        self.shared.load()
    }

    /// Rewrites both logs from the in-memory state.
    ///
    /// # Errors
    ///
    /// Returns a storage error. The previous logs stay intact.
    pub fn compact_datafile(&self) -> CoreResult<()> {
        self.shared.compact()
    }

    /// Number of completed compactions, the one done by loading included.
    #[must_use]
    pub fn compaction_count(&self) -> u64 {
        self.shared.compactions.load(Ordering::Relaxed)
    }

    /// Compacts periodically, replacing any previous schedule. Intervals
    /// below five seconds are raised to five seconds; zero stops
    /// compaction.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the background thread cannot be spawned.
    pub fn set_auto_compaction_interval(&self, interval: Duration) -> CoreResult<()> {
        let mut slot = self.compactor.lock();
        if let Some(mut previous) = slot.take() {
            previous.stop();
        }
        if let Some(interval) = clamp_interval(interval) {
            *slot = Some(AutoCompactor::start(&self.shared, interval)?);
            info!(?interval, "scheduled automatic compaction");
        }
        Ok(())
    }

    /// Stops periodic compaction.
    pub fn stop_auto_compaction(&self) {
        if let Some(mut compactor) = self.compactor.lock().take() {
            compactor.stop();
        }
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        self.stop_auto_compaction();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SortOrder;
    use crate::error::CoreError;
    use crate::persistence::{FnTransform, ID_FIELD};
    use emberdb_codec::Value;
    use emberdb_storage::LogKind;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Map {
        Value::from(value).into_object().unwrap()
    }

    fn memory() -> Datastore {
        Datastore::open(Config::new().rng_seed(3)).unwrap()
    }

    #[test]
    fn insert_find_roundtrip() {
        let store = memory();
        let ann = store.insert(doc(json!({"name": "ann", "age": 30}))).unwrap();
        store.insert(doc(json!({"name": "bob", "age": 25}))).unwrap();

        let found = store.find_one(&doc(json!({"name": "ann"}))).unwrap().unwrap();
        assert_eq!(found, ann);
        assert_eq!(store.count(&doc(json!({}))).unwrap(), 2);
        assert_eq!(store.count(&doc(json!({"age": {"$gt": 26}}))).unwrap(), 1);
    }

    #[test]
    fn returned_documents_are_copies() {
        let store = memory();
        let mut inserted = store.insert(doc(json!({"_id": "a", "n": 1}))).unwrap();
        inserted.insert("n".into(), Value::from(99));

        let mut found = store.find_one(&doc(json!({"_id": "a"}))).unwrap().unwrap();
        assert_eq!(found.get("n"), Some(&Value::from(1)));
        found.insert("n".into(), Value::from(50));
        assert_eq!(
            store.find_one(&doc(json!({"_id": "a"}))).unwrap().unwrap().get("n"),
            Some(&Value::from(1))
        );
    }

    #[test]
    fn update_single_and_multi() {
        let store = memory();
        store
            .insert_many((0..4).map(|i| doc(json!({"i": i, "kind": "x"}))).collect())
            .unwrap();

        let result = store
            .update(
                &doc(json!({"kind": "x"})),
                &doc(json!({"$set": {"seen": true}})),
                UpdateOptions::new(),
            )
            .unwrap();
        assert_eq!(result.num_affected, 1);
        assert!(result.documents.is_empty());

        let result = store
            .update(
                &doc(json!({"kind": "x"})),
                &doc(json!({"$set": {"seen": true}})),
                UpdateOptions::new().multi().return_updated_docs(),
            )
            .unwrap();
        assert_eq!(result.num_affected, 4);
        assert_eq!(result.documents.len(), 4);
        assert_eq!(store.count(&doc(json!({"seen": true}))).unwrap(), 4);
    }

    #[test]
    fn update_respects_unique_indexes() {
        let store = memory();
        store.ensure_index(IndexOptions::new("email").unique()).unwrap();
        store
            .insert_many(vec![
                doc(json!({"_id": "a", "email": "a@x"})),
                doc(json!({"_id": "b", "email": "b@x"})),
            ])
            .unwrap();

        let err = store
            .update(
                &doc(json!({"_id": "b"})),
                &doc(json!({"$set": {"email": "a@x"}})),
                UpdateOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolation { .. }));
        let b = store.find_one(&doc(json!({"_id": "b"}))).unwrap().unwrap();
        assert_eq!(b.get("email"), Some(&Value::from("b@x")));
        store.check_indexes().unwrap();
    }

    #[test]
    fn remove_single_and_multi() {
        let store = memory();
        store
            .insert_many((0..5).map(|i| doc(json!({"i": i}))).collect())
            .unwrap();
        let query = doc(json!({"i": {"$lt": 3}}));
        assert_eq!(store.remove(&query, RemoveOptions::new()).unwrap(), 1);
        assert_eq!(store.remove(&query, RemoveOptions::new().multi()).unwrap(), 2);
        assert_eq!(store.remove(&query, RemoveOptions::new().multi()).unwrap(), 0);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.db");
        {
            let store = Datastore::open(Config::new().filename(&path)).unwrap();
            store.ensure_index(IndexOptions::new("age")).unwrap();
            store.insert(doc(json!({"_id": "a", "age": 1}))).unwrap();
            store.insert(doc(json!({"_id": "b", "age": 2}))).unwrap();
            store
                .update(
                    &doc(json!({"_id": "a"})),
                    &doc(json!({"$inc": {"age": 10}})),
                    UpdateOptions::new(),
                )
                .unwrap();
            store.remove(&doc(json!({"_id": "b"})), RemoveOptions::new()).unwrap();
        }

        let store = Datastore::open(Config::new().filename(&path)).unwrap();
        assert_eq!(
            store.get_all_data().unwrap(),
            vec![doc(json!({"_id": "a", "age": 11}))]
        );
        assert_eq!(store.index_names().unwrap(), vec!["_id".to_string(), "age".to_string()]);
        // Loading compacts: one line per live document
        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[test]
    fn failed_reload_keeps_state() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Datastore::open(Config::new().backend(backend.clone())).unwrap();
        store.insert(doc(json!({"_id": "a"}))).unwrap();

        for _ in 0..3 {
            backend.append_line(LogKind::Data, "garbage").unwrap();
        }
        assert!(matches!(
            store.load_database().unwrap_err(),
            CoreError::CorruptionThresholdExceeded { .. }
        ));
        assert_eq!(store.len().unwrap(), 1);
        // The queue is usable again
        store.insert(doc(json!({"_id": "b"}))).unwrap();
    }

    #[test]
    fn asymmetric_transform_rejected() {
        let transform = FnTransform::new(|s: &str| format!("{s}!"), |s: &str| s.to_string());
        let err = Datastore::open(Config::new().transform(Arc::new(transform))).unwrap_err();
        assert!(matches!(err, CoreError::SerializationAsymmetry { .. }));
    }

    #[test]
    fn cannot_remove_id_index() {
        let store = memory();
        assert!(store.remove_index(ID_FIELD).is_err());
    }

    #[test]
    fn ttl_expiry() {
        let store = memory();
        store
            .ensure_index(IndexOptions::new("at").expire_after_seconds(0.2))
            .unwrap();
        let now = state::now_millis();
        store.insert(doc(json!({"_id": "old"}))).unwrap();
        store
            .update(
                &doc(json!({"_id": "old"})),
                &Map::from([(
                    "$set".to_string(),
                    Value::from(Map::from([("at".to_string(), Value::Date(now))])),
                )]),
                UpdateOptions::new(),
            )
            .unwrap();

        assert_eq!(store.count(&doc(json!({}))).unwrap(), 1);
        thread::sleep(Duration::from_millis(250));
        assert_eq!(store.get_candidates(&doc(json!({})), true).unwrap().len(), 1);
        assert_eq!(store.count(&doc(json!({}))).unwrap(), 0);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn sorted_find() {
        let store = memory();
        store
            .insert_many((0..5).map(|i| doc(json!({"i": 4 - i}))).collect())
            .unwrap();
        let docs = store
            .find(&doc(json!({})))
            .sort("i", SortOrder::Ascending)
            .skip(1)
            .limit(2)
            .exec()
            .unwrap();
        let values: Vec<_> = docs.iter().map(|d| d.get("i").cloned()).collect();
        assert_eq!(values, vec![Some(Value::from(1)), Some(Value::from(2))]);
    }

    #[test]
    fn auto_compaction_schedule() {
        let store = memory();
        store.set_auto_compaction_interval(Duration::from_millis(10)).unwrap();
        assert!(store.compactor.lock().is_some());
        store.set_auto_compaction_interval(Duration::ZERO).unwrap();
        assert!(store.compactor.lock().is_none());
        store.set_auto_compaction_interval(Duration::from_secs(60)).unwrap();
        store.stop_auto_compaction();
        assert!(store.compactor.lock().is_none());
    }

    #[test]
    fn compaction_counter() {
        let store = memory();
        assert_eq!(store.compaction_count(), 1);
        store.compact_datafile().unwrap();
        assert_eq!(store.compaction_count(), 2);
    }

    #[test]
    fn queued_operations_run_in_order() {
        let store = Arc::new(memory());
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    store.insert(doc(json!({"t": t, "i": i}))).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 100);
        store.check_indexes().unwrap();
    }
}
