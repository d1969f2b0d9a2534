//! In-memory state of a datastore.
//!
//! Every write follows the same order: stage the new document versions in
//! the arena, apply them to every index, append the log lines, and only then
//! drop the superseded versions. A failure at any step undoes the earlier
//! ones, so a failed call leaves the state as it found it.

use super::options::{UpdateOptions, UpdateResult};
use crate::arena::{DocArena, DocHandle};
use crate::error::{CoreError, CoreResult};
use crate::id::generate_unique_id;
use crate::index::{DocRef, Index, IndexOptions};
use crate::matcher::{is_modifier_update, DocumentMatcher};
use crate::persistence::{LoadedState, LogEntry, Persistence, ID_FIELD};
use crate::tree::RangeQuery;
use chrono::{DateTime, Utc};
use emberdb_codec::{
    check_document, get_path, set_path, truncate_dates, Document, Map, Value, PATH_SEPARATOR,
    RESERVED_PREFIX,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info};

/// Creation timestamp field.
pub const CREATED_AT: &str = "createdAt";

/// Last update timestamp field.
pub const UPDATED_AT: &str = "updatedAt";

/// Collaborators an operation needs besides the state itself.
pub(crate) struct Context<'a> {
    pub persistence: &'a Persistence,
    pub matcher: &'a dyn DocumentMatcher,
    pub timestamp_data: bool,
}

/// Documents, indexes and TTL rules of one store.
///
/// The `_id` index always exists and holds every live document.
#[derive(Debug)]
pub(crate) struct State {
    arena: DocArena,
    indexes: BTreeMap<String, Index>,
    ttl: BTreeMap<String, f64>,
    seeder: Option<StdRng>,
}

fn refs<'a>(arena: &'a DocArena, handles: &[DocHandle]) -> Vec<DocRef<'a>> {
    handles
        .iter()
        .filter_map(|h| arena.get(*h).map(|doc| (*h, doc)))
        .collect()
}

fn pair_refs<'a>(
    arena: &'a DocArena,
    pairs: &[(DocHandle, DocHandle)],
) -> Vec<(DocRef<'a>, DocRef<'a>)> {
    pairs
        .iter()
        .filter_map(|(old, new)| Some(((*old, arena.get(*old)?), (*new, arena.get(*new)?))))
        .collect()
}

/// Current time truncated to the millisecond precision of the log format.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn operators(condition: &Value) -> Option<&Map> {
    condition
        .as_object()
        .filter(|m| !m.is_empty() && m.keys().all(|k| k.starts_with(RESERVED_PREFIX)))
}

/// The plain equality fields of `query`, used as the base of an upserted
/// document.
fn upsert_base(query: &Map) -> CoreResult<Document> {
    let mut base = Document::new();
    for (field, condition) in query {
        if field.starts_with(RESERVED_PREFIX) {
            continue;
        }
        let has_operators = condition
            .as_object()
            .is_some_and(|m| m.keys().any(|k| k.starts_with(RESERVED_PREFIX)));
        if !has_operators {
            set_path(&mut base, field, condition.clone())?;
        }
    }
    Ok(base)
}

/// Whether `update` writes `updatedAt` itself.
fn sets_updated_at(update: &Map, modifier: bool) -> bool {
    if !modifier {
        return update.contains_key(UPDATED_AT);
    }
    update
        .values()
        .filter_map(Value::as_object)
        .flat_map(|fields| fields.keys())
        .any(|path| {
            path.strip_prefix(UPDATED_AT)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(PATH_SEPARATOR))
        })
}

impl State {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let mut state = Self {
            arena: DocArena::new(),
            indexes: BTreeMap::new(),
            ttl: BTreeMap::new(),
            seeder: seed.map(StdRng::seed_from_u64),
        };
        let primary = state.new_index(IndexOptions::new(ID_FIELD).unique());
        state.indexes.insert(ID_FIELD.to_string(), primary);
        state
    }

    /// Rebuilds a state from a log replay.
    pub(crate) fn from_loaded(loaded: LoadedState, seed: Option<u64>) -> CoreResult<Self> {
        let mut state = Self::new(seed);
        for options in loaded.indexes {
            if options.field_name == ID_FIELD {
                continue;
            }
            if let Some(seconds) = options.expire_after_seconds {
                state.ttl.insert(options.field_name.clone(), seconds);
            }
            let index = state.new_index(options);
            state.indexes.insert(index.field_name().to_string(), index);
        }

        let handles: Vec<DocHandle> = loaded
            .documents
            .into_iter()
            .map(|doc| state.arena.insert(doc))
            .collect();
        state.index_documents(&handles)?;
        Ok(state)
    }

    fn new_index(&mut self, options: IndexOptions) -> Index {
        match &mut self.seeder {
            Some(seeder) => {
                let rng = StdRng::seed_from_u64(seeder.next_u64());
                Index::with_rng(options, Box::new(rng))
            }
            None => Index::new(options),
        }
    }

    fn primary(&self) -> Option<&Index> {
        self.indexes.get(ID_FIELD)
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    /// Every live document, in `_id` order.
    pub(crate) fn handles(&self) -> Vec<DocHandle> {
        self.primary().map(Index::get_all).unwrap_or_default()
    }

    pub(crate) fn document(&self, handle: DocHandle) -> Option<&Document> {
        self.arena.get(handle)
    }

    pub(crate) fn documents(&self) -> Vec<&Document> {
        self.handles()
            .into_iter()
            .filter_map(|h| self.arena.get(h))
            .collect()
    }

    pub(crate) fn index_options(&self) -> Vec<IndexOptions> {
        self.indexes.values().map(|i| i.options().clone()).collect()
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Checks every index tree and that the `_id` index covers the arena.
    pub(crate) fn check_invariants(&self) -> CoreResult<()> {
        for index in self.indexes.values() {
            index.check_invariants()?;
        }
        let indexed = self.handles().len();
        if indexed != self.arena.len() {
            return Err(CoreError::tree_invariant(format!(
                "_id index holds {indexed} documents, store holds {}",
                self.arena.len()
            )));
        }
        Ok(())
    }

    /// Rewrites both logs from this state.
    pub(crate) fn compact(&self, ctx: &Context<'_>) -> CoreResult<()> {
        ctx.persistence
            .compact(self.documents(), &self.index_options())
    }

    fn id_taken(&self, id: &Value) -> bool {
        self.primary()
            .is_some_and(|primary| !primary.get_matching(id).is_empty())
    }

    fn discard(&mut self, handles: &[DocHandle]) {
        for handle in handles {
            self.arena.remove(*handle);
        }
    }

    /// Adds staged documents to every index, all or nothing.
    fn index_documents(&mut self, handles: &[DocHandle]) -> CoreResult<()> {
        let docs = refs(&self.arena, handles);
        let mut failure = None;
        for (position, index) in self.indexes.values_mut().enumerate() {
            if let Err(e) = index.insert_many(&docs) {
                failure = Some((position, e));
                break;
            }
        }
        if let Some((failed_at, e)) = failure {
            for index in self.indexes.values_mut().take(failed_at) {
                index.remove_many(&docs);
            }
            return Err(e);
        }
        Ok(())
    }

    fn unindex_documents(&mut self, handles: &[DocHandle]) {
        let docs = refs(&self.arena, handles);
        for index in self.indexes.values_mut() {
            index.remove_many(&docs);
        }
    }

    /// Swaps old versions for new ones in every index, all or nothing.
    fn update_indexes(&mut self, pairs: &[(DocHandle, DocHandle)]) -> CoreResult<()> {
        let pairs = pair_refs(&self.arena, pairs);
        let mut failure = None;
        for (position, index) in self.indexes.values_mut().enumerate() {
            if let Err(e) = index.update_many(&pairs) {
                failure = Some((position, e));
                break;
            }
        }
        if let Some((failed_at, e)) = failure {
            for index in self.indexes.values_mut().take(failed_at) {
                if let Err(revert) = index.revert_update(&pairs) {
                    error!(field = index.field_name(), error = %revert, "failed to revert index update");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn revert_indexes(&mut self, pairs: &[(DocHandle, DocHandle)]) {
        let pairs = pair_refs(&self.arena, pairs);
        for index in self.indexes.values_mut() {
            if let Err(e) = index.revert_update(&pairs) {
                error!(field = index.field_name(), error = %e, "failed to revert index update");
            }
        }
    }

    fn prepare_insert(
        &self,
        mut doc: Document,
        timestamp_data: bool,
        now: DateTime<Utc>,
        batch: &[Document],
    ) -> CoreResult<Document> {
        match doc.get(ID_FIELD) {
            None => {
                let id = generate_unique_id(|candidate| {
                    let candidate = Value::String(candidate.to_string());
                    self.id_taken(&candidate)
                        || batch.iter().any(|d| d.get(ID_FIELD) == Some(&candidate))
                });
                doc.insert(ID_FIELD.to_string(), Value::String(id));
            }
            Some(Value::String(_) | Value::Number(_)) => {}
            Some(other) => {
                return Err(CoreError::validation(format!(
                    "_id must be a string or a number, got {}",
                    other.type_name()
                )))
            }
        }
        if timestamp_data {
            doc.entry(CREATED_AT.to_string())
                .or_insert(Value::Date(now));
            doc.entry(UPDATED_AT.to_string())
                .or_insert(Value::Date(now));
        }
        truncate_dates(&mut doc);
        check_document(&doc)?;
        Ok(doc)
    }

    /// Inserts a batch. Either every document is stored and logged, or
    /// none is.
    pub(crate) fn insert(
        &mut self,
        ctx: &Context<'_>,
        docs: Vec<Document>,
    ) -> CoreResult<Vec<Document>> {
        let now = now_millis();
        let mut prepared: Vec<Document> = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc = self.prepare_insert(doc, ctx.timestamp_data, now, &prepared)?;
            prepared.push(doc);
        }
        if prepared.is_empty() {
            return Ok(prepared);
        }

        let handles: Vec<DocHandle> = prepared
            .iter()
            .map(|doc| self.arena.insert(doc.clone()))
            .collect();
        if let Err(e) = self.index_documents(&handles) {
            self.discard(&handles);
            return Err(e);
        }

        let entries: Vec<LogEntry> = prepared.iter().cloned().map(LogEntry::Document).collect();
        if let Err(e) = ctx.persistence.persist_new_state(&entries) {
            self.unindex_documents(&handles);
            self.discard(&handles);
            return Err(e);
        }

        debug!(count = prepared.len(), "inserted documents");
        Ok(prepared)
    }

    /// Documents that may match `query`, narrowed through one index when
    /// the query allows it.
    ///
    /// Unless `skip_expiry` is set, expired candidates are removed from the
    /// store before the rest are returned.
    pub(crate) fn get_candidates(
        &mut self,
        ctx: &Context<'_>,
        query: &Map,
        skip_expiry: bool,
    ) -> CoreResult<Vec<DocHandle>> {
        let handles = self.index_candidates(query);
        if skip_expiry || self.ttl.is_empty() {
            return Ok(handles);
        }

        let now = Utc::now();
        let (expired, live): (Vec<DocHandle>, Vec<DocHandle>) = handles.into_iter().partition(|h| {
            self.arena
                .get(*h)
                .is_some_and(|doc| self.is_expired(doc, now))
        });
        if !expired.is_empty() {
            debug!(count = expired.len(), "removing expired documents");
            self.remove_handles(ctx, &expired)?;
        }
        Ok(live)
    }

    fn is_expired(&self, doc: &Document, now: DateTime<Utc>) -> bool {
        self.ttl.iter().any(|(field, seconds)| match get_path(doc, field) {
            Some(Value::Date(date)) => (now - date).num_milliseconds() as f64 > seconds * 1000.0,
            _ => false,
        })
    }

    /// Query conditions on indexed fields, with their index.
    fn indexed_conditions<'a>(
        &'a self,
        query: &'a Map,
    ) -> impl Iterator<Item = (&'a Index, &'a Value)> + 'a {
        query.iter().filter_map(move |(field, condition)| {
            if field.starts_with(RESERVED_PREFIX) {
                return None;
            }
            self.indexes.get(field).map(|index| (index, condition))
        })
    }

    fn index_candidates(&self, query: &Map) -> Vec<DocHandle> {
        for (index, condition) in self.indexed_conditions(query) {
            if condition.is_primitive() {
                return index.get_matching(condition);
            }
        }

        for (index, condition) in self.indexed_conditions(query) {
            if let Some(value) = operators(condition).and_then(|ops| ops.get("$eq")) {
                return index.get_matching(value);
            }
        }

        for (index, condition) in self.indexed_conditions(query) {
            if let Some(Value::Array(items)) = operators(condition).and_then(|ops| ops.get("$in")) {
                let mut seen = HashSet::new();
                return items
                    .iter()
                    .flat_map(|item| index.get_matching(item))
                    .filter(|h| seen.insert(*h))
                    .collect();
            }
        }

        for (index, condition) in self.indexed_conditions(query) {
            let Some(ops) = operators(condition) else {
                continue;
            };
            let mut range = RangeQuery::new();
            for (operator, bound) in ops {
                range = match operator.as_str() {
                    "$gt" => range.gt(bound.clone()),
                    "$gte" => range.gte(bound.clone()),
                    "$lt" => range.lt(bound.clone()),
                    "$lte" => range.lte(bound.clone()),
                    _ => range,
                };
            }
            if !range.is_unbounded() {
                return index.get_between_bounds(&range);
            }
        }

        self.handles()
    }

    fn matching(
        &mut self,
        ctx: &Context<'_>,
        query: &Map,
        multi: bool,
    ) -> CoreResult<Vec<DocHandle>> {
        let mut matched = Vec::new();
        for handle in self.get_candidates(ctx, query, false)? {
            let Some(doc) = self.arena.get(handle) else {
                continue;
            };
            if ctx.matcher.matches(doc, query)? {
                matched.push(handle);
                if !multi {
                    break;
                }
            }
        }
        Ok(matched)
    }

    /// Applies `update` to the documents matching `query`.
    pub(crate) fn update(
        &mut self,
        ctx: &Context<'_>,
        query: &Map,
        update: &Map,
        options: UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        let modifier = is_modifier_update(update)?;
        let matched = self.matching(ctx, query, options.multi)?;
        if matched.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }
            let doc = if modifier {
                ctx.matcher.modify(&upsert_base(query)?, update)?
            } else {
                update.clone()
            };
            let documents = self.insert(ctx, vec![doc])?;
            return Ok(UpdateResult {
                num_affected: 1,
                upsert: true,
                documents,
            });
        }

        let now = now_millis();
        let keeps_updated_at = sets_updated_at(update, modifier);
        let mut replaced = Vec::with_capacity(matched.len());
        for handle in matched {
            let Some(old) = self.arena.get(handle) else {
                continue;
            };
            let mut new = ctx.matcher.modify(old, update)?;
            truncate_dates(&mut new);
            if ctx.timestamp_data {
                if let Some(created) = old.get(CREATED_AT) {
                    new.insert(CREATED_AT.to_string(), created.clone());
                }
                if !keeps_updated_at {
                    new.insert(UPDATED_AT.to_string(), Value::Date(now));
                }
            }
            replaced.push((handle, new));
        }

        let pairs: Vec<(DocHandle, DocHandle)> = replaced
            .iter()
            .map(|(old, new)| (*old, self.arena.insert(new.clone())))
            .collect();
        let new_handles: Vec<DocHandle> = pairs.iter().map(|(_, new)| *new).collect();
        if let Err(e) = self.update_indexes(&pairs) {
            self.discard(&new_handles);
            return Err(e);
        }

        let entries: Vec<LogEntry> = replaced
            .iter()
            .map(|(_, doc)| LogEntry::Document(doc.clone()))
            .collect();
        if let Err(e) = ctx.persistence.persist_new_state(&entries) {
            self.revert_indexes(&pairs);
            self.discard(&new_handles);
            return Err(e);
        }

        let old_handles: Vec<DocHandle> = pairs.iter().map(|(old, _)| *old).collect();
        self.discard(&old_handles);

        let num_affected = replaced.len();
        debug!(count = num_affected, "updated documents");
        let documents = if options.return_updated_docs {
            replaced.into_iter().map(|(_, doc)| doc).collect()
        } else {
            Vec::new()
        };
        Ok(UpdateResult {
            num_affected,
            upsert: false,
            documents,
        })
    }

    /// Removes the documents matching `query`.
    pub(crate) fn remove(&mut self, ctx: &Context<'_>, query: &Map, multi: bool) -> CoreResult<usize> {
        let matched = self.matching(ctx, query, multi)?;
        self.remove_handles(ctx, &matched)
    }

    fn remove_handles(&mut self, ctx: &Context<'_>, handles: &[DocHandle]) -> CoreResult<usize> {
        if handles.is_empty() {
            return Ok(0);
        }
        let tombstones: Vec<LogEntry> = handles
            .iter()
            .filter_map(|h| self.arena.get(*h))
            .filter_map(|doc| doc.get(ID_FIELD).cloned())
            .map(LogEntry::Tombstone)
            .collect();

        self.unindex_documents(handles);
        if let Err(e) = ctx.persistence.persist_new_state(&tombstones) {
            if let Err(restore) = self.index_documents(handles) {
                error!(error = %restore, "failed to restore removed documents");
            }
            return Err(e);
        }
        self.discard(handles);
        debug!(count = handles.len(), "removed documents");
        Ok(handles.len())
    }

    /// Creates an index over existing documents and logs its definition.
    ///
    /// Returns false if the field was already indexed.
    pub(crate) fn ensure_index(&mut self, ctx: &Context<'_>, options: IndexOptions) -> CoreResult<bool> {
        options.validate()?;
        if self.indexes.contains_key(&options.field_name) {
            return Ok(false);
        }

        let mut index = self.new_index(options.clone());
        let handles = self.handles();
        index.insert_many(&refs(&self.arena, &handles))?;
        ctx.persistence
            .persist_new_state(&[LogEntry::IndexCreated(options.clone())])?;

        if let Some(seconds) = options.expire_after_seconds {
            self.ttl.insert(options.field_name.clone(), seconds);
        }
        info!(field = %options.field_name, unique = options.unique, sparse = options.sparse, "created index");
        self.indexes.insert(options.field_name, index);
        Ok(true)
    }

    /// Drops an index and logs the removal.
    ///
    /// Returns false if the field was not indexed.
    pub(crate) fn remove_index(&mut self, ctx: &Context<'_>, field: &str) -> CoreResult<bool> {
        if field == ID_FIELD {
            return Err(CoreError::invalid_operation("the _id index cannot be removed"));
        }
        if !self.indexes.contains_key(field) {
            return Ok(false);
        }
        ctx.persistence
            .persist_new_state(&[LogEntry::IndexRemoved(field.to_string())])?;
        self.indexes.remove(field);
        self.ttl.remove(field);
        info!(field, "removed index");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::BasicMatcher;
    use crate::persistence::IdentityTransform;
    use emberdb_storage::{InMemoryBackend, LogBackend, LogKind, StorageError, StorageResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Memory backend whose appends can be switched off.
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryBackend,
        failing: AtomicBool,
    }

    impl LogBackend for FlakyBackend {
        fn init(&self) -> StorageResult<()> {
            self.inner.init()
        }

        fn read_lines(&self, kind: LogKind, emit: &mut dyn FnMut(&str)) -> StorageResult<()> {
            self.inner.read_lines(kind, emit)
        }

        fn rewrite(&self, kind: LogKind, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()> {
            self.inner.rewrite(kind, lines)
        }

        fn append_line(&self, kind: LogKind, line: &str) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.inner.append_line(kind, line)
        }
    }

    struct Fixture {
        backend: Arc<FlakyBackend>,
        persistence: Persistence,
        matcher: BasicMatcher,
        state: State,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(FlakyBackend::default());
            let persistence = Persistence::new(
                backend.clone(),
                Arc::new(IdentityTransform),
                0.1,
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();
            Self {
                backend,
                persistence,
                matcher: BasicMatcher,
                state: State::new(Some(7)),
            }
        }

        fn ctx(&self, timestamp_data: bool) -> Context<'_> {
            Context {
                persistence: &self.persistence,
                matcher: &self.matcher,
                timestamp_data,
            }
        }

        fn insert(&mut self, docs: Vec<serde_json::Value>) -> CoreResult<Vec<Document>> {
            let ctx = Context {
                persistence: &self.persistence,
                matcher: &self.matcher,
                timestamp_data: false,
            };
            self.state.insert(&ctx, docs.into_iter().map(doc).collect())
        }

        fn ensure(&mut self, options: IndexOptions) {
            let ctx = Context {
                persistence: &self.persistence,
                matcher: &self.matcher,
                timestamp_data: false,
            };
            self.state.ensure_index(&ctx, options).unwrap();
        }

        fn data_lines(&self) -> usize {
            self.backend.inner.lines(LogKind::Data).len()
        }
    }

    fn doc(value: serde_json::Value) -> Map {
        Value::from(value).into_object().unwrap()
    }

    #[test]
    fn insert_assigns_ids() {
        let mut fx = Fixture::new();
        let out = fx.insert(vec![json!({"a": 1}), json!({"_id": 5, "a": 2})]).unwrap();
        assert!(out[0].get(ID_FIELD).and_then(Value::as_str).is_some());
        assert_eq!(out[1].get(ID_FIELD), Some(&Value::Number(5.0)));
        assert_eq!(fx.state.len(), 2);
        assert_eq!(fx.data_lines(), 2);
        fx.state.check_invariants().unwrap();
    }

    #[test]
    fn insert_rejects_bad_documents() {
        let mut fx = Fixture::new();
        assert!(fx.insert(vec![json!({"$a": 1})]).is_err());
        assert!(fx.insert(vec![json!({"_id": true})]).is_err());
        assert!(fx.insert(vec![json!({"a": 1}), json!({"b.c": 1})]).is_err());
        assert_eq!(fx.state.len(), 0);
        assert_eq!(fx.data_lines(), 0);
    }

    #[test]
    fn insert_rejects_non_finite_numbers() {
        let mut fx = Fixture::new();
        let mut bad = Map::new();
        bad.insert("x".to_string(), Value::Number(f64::INFINITY));
        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(false);
        let err = state.insert(&ctx, vec![bad]).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn dates_keep_millisecond_precision_across_compaction() {
        let mut fx = Fixture::new();
        let precise = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let mut input = Map::new();
        input.insert(ID_FIELD.to_string(), Value::from("d"));
        input.insert("at".to_string(), Value::Date(precise));
        input.insert("list".to_string(), Value::Array(vec![Value::Date(precise)]));

        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(true);
        let stored = state.insert(&ctx, vec![input]).unwrap().remove(0);
        let expected = Value::Date(DateTime::from_timestamp_millis(1_700_000_000_123).unwrap());
        assert_eq!(stored.get("at"), Some(&expected));

        let mut set = Map::new();
        set.insert("later".to_string(), Value::Date(precise));
        let mut update = Map::new();
        update.insert("$set".to_string(), Value::Object(set));
        state
            .update(&ctx, &doc(json!({"_id": "d"})), &update, UpdateOptions::new())
            .unwrap();

        state.compact(&ctx).unwrap();
        let reloaded = State::from_loaded(fx.persistence.load().unwrap(), None).unwrap();
        let before: Vec<Document> = state.documents().into_iter().cloned().collect();
        let after: Vec<Document> = reloaded.documents().into_iter().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(after[0].get("later"), Some(&expected));
    }

    #[test]
    fn modifier_results_are_validated() {
        let mut fx = Fixture::new();
        fx.insert(vec![json!({"_id": "x", "n": 1.7e308, "t": [1]})]).unwrap();
        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(false);
        let query = doc(json!({"_id": "x"}));

        for update in [
            json!({"$inc": {"n": 1.7e308}}),
            json!({"$set": {"t.18446744073709551615": 1}}),
            json!({"$set": {"t.100000000000": 1}}),
        ] {
            let err = state
                .update(&ctx, &query, &doc(update), UpdateOptions::new())
                .unwrap_err();
            assert!(err.is_validation(), "{err}");
        }
        let kept = state.documents()[0].clone();
        assert_eq!(kept, doc(json!({"_id": "x", "n": 1.7e308, "t": [1]})));
        assert_eq!(fx.data_lines(), 1);
    }

    #[test]
    fn duplicate_batch_is_rolled_back() {
        let mut fx = Fixture::new();
        fx.ensure(IndexOptions::new("email").unique());
        fx.insert(vec![json!({"email": "a@x"})]).unwrap();

        let err = fx
            .insert(vec![json!({"email": "b@x"}), json!({"email": "a@x"})])
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolation { .. }));
        assert_eq!(fx.state.len(), 1);
        assert_eq!(fx.data_lines(), 1);
        fx.state.check_invariants().unwrap();
    }

    #[test]
    fn failed_append_rolls_back_insert() {
        let mut fx = Fixture::new();
        fx.ensure(IndexOptions::new("a"));
        fx.backend.failing.store(true, Ordering::SeqCst);
        assert!(fx.insert(vec![json!({"a": 1})]).is_err());
        assert_eq!(fx.state.len(), 0);
        fx.state.check_invariants().unwrap();
    }

    #[test]
    fn failed_append_rolls_back_update_and_remove() {
        let mut fx = Fixture::new();
        fx.ensure(IndexOptions::new("a"));
        fx.insert(vec![json!({"_id": "x", "a": 1})]).unwrap();
        fx.backend.failing.store(true, Ordering::SeqCst);

        let query = doc(json!({"_id": "x"}));
        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(false);
        assert!(state
            .update(&ctx, &query, &doc(json!({"$set": {"a": 2}})), UpdateOptions::new())
            .is_err());
        assert!(state.remove(&ctx, &query, false).is_err());

        let handles = state.index_candidates(&doc(json!({"a": 1})));
        assert_eq!(handles.len(), 1);
        assert_eq!(state.len(), 1);
        state.check_invariants().unwrap();
    }

    #[test]
    fn candidates_use_indexes() {
        let mut fx = Fixture::new();
        fx.ensure(IndexOptions::new("n"));
        fx.insert((0..10).map(|n| json!({"n": n})).collect()).unwrap();

        let count = |q: serde_json::Value| fx.state.index_candidates(&doc(q)).len();
        assert_eq!(count(json!({"n": 3})), 1);
        assert_eq!(count(json!({"n": {"$eq": 4}})), 1);
        assert_eq!(count(json!({"n": {"$in": [1, 2, 2, 50]}})), 2);
        assert_eq!(count(json!({"n": {"$gte": 7}})), 3);
        assert_eq!(count(json!({"n": {"$gt": 2, "$lte": 4}})), 2);
        // No usable index: full scan
        assert_eq!(count(json!({"m": 1})), 10);
        assert_eq!(count(json!({"n": {"$ne": 1}})), 10);
    }

    #[test]
    fn upsert_builds_from_query() {
        let mut fx = Fixture::new();
        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(false);
        let result = state
            .update(
                &ctx,
                &doc(json!({"name": "ann", "age": {"$gt": 3}, "$or": [{"x": 1}]})),
                &doc(json!({"$inc": {"visits": 1}})),
                UpdateOptions::new().upsert(),
            )
            .unwrap();
        assert!(result.upsert);
        assert_eq!(result.num_affected, 1);
        let inserted = &result.documents[0];
        assert_eq!(inserted.get("name"), Some(&Value::from("ann")));
        assert_eq!(inserted.get("visits"), Some(&Value::Number(1.0)));
        assert!(inserted.get("age").is_none());
    }

    #[test]
    fn update_timestamps() {
        let mut fx = Fixture::new();
        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(true);
        let inserted = state.insert(&ctx, vec![doc(json!({"_id": "a"}))]).unwrap();
        let created = inserted[0].get(CREATED_AT).cloned().unwrap();
        assert_eq!(inserted[0].get(UPDATED_AT), Some(&created));

        let result = state
            .update(
                &ctx,
                &doc(json!({"_id": "a"})),
                &doc(json!({"x": 1})),
                UpdateOptions::new().return_updated_docs(),
            )
            .unwrap();
        let updated = &result.documents[0];
        assert_eq!(updated.get(CREATED_AT), Some(&created));
        assert!(updated.get(UPDATED_AT).is_some());

        let pinned = Value::Date(DateTime::from_timestamp_millis(0).unwrap());
        let mut set = Map::new();
        set.insert(UPDATED_AT.to_string(), pinned.clone());
        let mut update = Map::new();
        update.insert("$set".to_string(), Value::Object(set));
        let result = state
            .update(
                &ctx,
                &doc(json!({"_id": "a"})),
                &update,
                UpdateOptions::new().return_updated_docs(),
            )
            .unwrap();
        assert_eq!(result.documents[0].get(UPDATED_AT), Some(&pinned));
    }

    #[test]
    fn updated_at_detection() {
        let modifier = |u: serde_json::Value| sets_updated_at(&doc(u), true);
        assert!(modifier(json!({"$set": {"updatedAt": 1}})));
        assert!(modifier(json!({"$unset": {"updatedAt.x": true}})));
        assert!(!modifier(json!({"$set": {"updatedAtX": 1}})));
        assert!(sets_updated_at(&doc(json!({"updatedAt": 1})), false));
    }

    #[test]
    fn index_lifecycle() {
        let mut fx = Fixture::new();
        fx.insert(vec![json!({"a": 1}), json!({"a": 1})]).unwrap();

        let mut state = std::mem::replace(&mut fx.state, State::new(None));
        let ctx = fx.ctx(false);
        assert!(state
            .ensure_index(&ctx, IndexOptions::new("a").unique())
            .is_err());
        assert_eq!(state.index_names(), vec![ID_FIELD.to_string()]);

        assert!(state.ensure_index(&ctx, IndexOptions::new("a")).unwrap());
        assert!(!state.ensure_index(&ctx, IndexOptions::new("a")).unwrap());
        assert!(state.remove_index(&ctx, "a").unwrap());
        assert!(!state.remove_index(&ctx, "a").unwrap());
        assert!(state.remove_index(&ctx, ID_FIELD).is_err());
    }
}
