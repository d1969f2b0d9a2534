//! Field index over the ordered tree.

use crate::arena::DocHandle;
use crate::error::{CoreError, CoreResult};
use crate::index::options::IndexOptions;
use crate::tree::{AvlTree, DuplicateKey, RangeQuery};
use emberdb_codec::{compare_optional, compare_values, get_path, Document, Value};
use rand::RngCore;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// A document version as seen by an index: its handle and its content.
pub type DocRef<'a> = (DocHandle, &'a Document);

/// Index key. `None` stands for an undefined field.
pub type IndexKey = Option<Value>;

/// An index over one field of a document set.
///
/// Array-valued fields are indexed once per distinct element. Every
/// mutating call either fully succeeds or leaves the index exactly as it
/// was before the call.
#[derive(Debug)]
pub struct Index {
    options: IndexOptions,
    tree: AvlTree<IndexKey, DocHandle>,
}

fn key_comparator() -> crate::tree::Comparator<IndexKey> {
    Arc::new(|a: &IndexKey, b: &IndexKey| compare_optional(a.as_ref(), b.as_ref()))
}

impl Index {
    /// Creates an empty index.
    pub fn new(options: IndexOptions) -> Self {
        let tree = AvlTree::new(options.unique, key_comparator());
        Self { options, tree }
    }

    /// Creates an empty index whose tree draws from `rng` on deletion.
    pub fn with_rng(options: IndexOptions, rng: Box<dyn RngCore + Send>) -> Self {
        let tree = AvlTree::new(options.unique, key_comparator()).with_rng(rng);
        Self { options, tree }
    }

    /// Returns the index definition.
    #[must_use]
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Returns the indexed field path.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.options.field_name
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        self.tree.clear();
    }

    /// Computes the keys under which `doc` is indexed.
    ///
    /// Empty when the document is skipped (sparse index with an undefined
    /// field, or an empty array).
    fn keys(&self, doc: &Document) -> Vec<IndexKey> {
        match get_path(doc, &self.options.field_name) {
            None if self.options.sparse => Vec::new(),
            None => vec![None],
            Some(Value::Array(items)) => {
                let mut distinct: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !distinct
                        .iter()
                        .any(|seen| compare_values(seen, &item) == Ordering::Equal)
                    {
                        distinct.push(item);
                    }
                }
                distinct.into_iter().map(Some).collect()
            }
            Some(value) => vec![Some(value)],
        }
    }

    /// Indexes one document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueViolation`] if a key is taken; keys
    /// already inserted for this document are removed first.
    pub fn insert(&mut self, doc: DocRef<'_>) -> CoreResult<()> {
        let (handle, doc) = doc;
        let keys = self.keys(doc);

        for (i, key) in keys.iter().enumerate() {
            if let Err(DuplicateKey { key }) = self.tree.insert(key.clone(), handle) {
                for inserted in keys[..i].iter().rev() {
                    self.tree.delete(inserted, Some(&handle));
                }
                return Err(CoreError::unique_violation(&self.options.field_name, key));
            }
        }
        Ok(())
    }

    /// Indexes several documents, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns the first violation after un-indexing the documents of this
    /// call that were already inserted, in reverse order.
    pub fn insert_many(&mut self, docs: &[DocRef<'_>]) -> CoreResult<()> {
        for (i, doc) in docs.iter().enumerate() {
            if let Err(e) = self.insert(*doc) {
                for inserted in docs[..i].iter().rev() {
                    self.remove(*inserted);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Un-indexes one document. Documents that were never indexed are ignored.
    pub fn remove(&mut self, doc: DocRef<'_>) {
        let (handle, doc) = doc;
        for key in self.keys(doc) {
            self.tree.delete(&key, Some(&handle));
        }
    }

    /// Un-indexes several documents.
    pub fn remove_many(&mut self, docs: &[DocRef<'_>]) {
        for doc in docs {
            self.remove(*doc);
        }
    }

    /// Replaces `old` with `new`.
    ///
    /// # Errors
    ///
    /// If `new` cannot be indexed, `old` is indexed again and the violation
    /// is returned.
    pub fn update(&mut self, old: DocRef<'_>, new: DocRef<'_>) -> CoreResult<()> {
        self.remove(old);
        if let Err(e) = self.insert(new) {
            self.restore(&[old]);
            return Err(e);
        }
        Ok(())
    }

    /// Replaces every `old` with its `new`, as one batch.
    ///
    /// # Errors
    ///
    /// On the first violation every new version indexed so far is removed
    /// and every old version is indexed again.
    pub fn update_many(&mut self, pairs: &[(DocRef<'_>, DocRef<'_>)]) -> CoreResult<()> {
        for (old, _) in pairs {
            self.remove(*old);
        }

        for (i, (_, new)) in pairs.iter().enumerate() {
            if let Err(e) = self.insert(*new) {
                for (_, inserted) in pairs[..i].iter().rev() {
                    self.remove(*inserted);
                }
                let olds: Vec<DocRef<'_>> = pairs.iter().map(|(old, _)| *old).collect();
                self.restore(&olds);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undoes a successful [`update_many`](Self::update_many).
    ///
    /// # Errors
    ///
    /// Fails only if the index was modified in between.
    pub fn revert_update(&mut self, pairs: &[(DocRef<'_>, DocRef<'_>)]) -> CoreResult<()> {
        let reverted: Vec<(DocRef<'_>, DocRef<'_>)> =
            pairs.iter().map(|(old, new)| (*new, *old)).collect();
        self.update_many(&reverted)
    }

    /// Re-indexes documents that were indexed before the failed call.
    fn restore(&mut self, docs: &[DocRef<'_>]) {
        for doc in docs {
            if let Err(e) = self.insert(*doc) {
                // Cannot happen: the keys were free before the call
                tracing::error!(field = %self.options.field_name, error = %e, "failed to restore index entry");
            }
        }
    }

    /// Returns the documents indexed under `key`.
    ///
    /// An array key returns the union of its elements' matches, without
    /// duplicates.
    #[must_use]
    pub fn get_matching(&self, key: &Value) -> Vec<DocHandle> {
        match key {
            Value::Array(keys) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for key in keys {
                    for handle in self.tree.search(&Some(key.clone())) {
                        if seen.insert(handle) {
                            out.push(handle);
                        }
                    }
                }
                out
            }
            key => self.tree.search(&Some(key.clone())),
        }
    }

    /// Returns the documents whose key lies within the bounds, ascending.
    #[must_use]
    pub fn get_between_bounds(&self, query: &RangeQuery<Value>) -> Vec<DocHandle> {
        let bounds = RangeQuery {
            gt: query.gt.clone().map(Some),
            gte: query.gte.clone().map(Some),
            lt: query.lt.clone().map(Some),
            lte: query.lte.clone().map(Some),
        };
        self.tree.between_bounds(&bounds)
    }

    /// Returns every indexed document once, in key order.
    #[must_use]
    pub fn get_all(&self) -> Vec<DocHandle> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.tree.execute_on_every_node(|_, handles| {
            for handle in handles {
                if seen.insert(*handle) {
                    out.push(*handle);
                }
            }
        });
        out
    }

    /// Checks the underlying tree.
    ///
    /// # Errors
    ///
    /// See [`AvlTree::check_invariants`].
    pub fn check_invariants(&self) -> CoreResult<()> {
        self.tree.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::DocArena;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Value::from(value).into_object().unwrap()
    }

    fn store(arena: &mut DocArena, docs: Vec<serde_json::Value>) -> Vec<DocHandle> {
        docs.into_iter().map(|d| arena.insert(doc(d))).collect()
    }

    fn refs<'a>(arena: &'a DocArena, handles: &[DocHandle]) -> Vec<DocRef<'a>> {
        handles
            .iter()
            .map(|h| (*h, arena.get(*h).unwrap()))
            .collect()
    }

    fn sorted(mut handles: Vec<DocHandle>) -> Vec<DocHandle> {
        handles.sort();
        handles
    }

    #[test]
    fn matching_and_bounds() {
        let mut arena = DocArena::new();
        let h = store(
            &mut arena,
            vec![json!({"a": 5}), json!({"a": 6}), json!({"a": 5, "b": "x"})],
        );
        let mut index = Index::new(IndexOptions::new("a"));
        index.insert_many(&refs(&arena, &h)).unwrap();

        assert_eq!(sorted(index.get_matching(&Value::from(5))), vec![h[0], h[2]]);
        assert_eq!(
            index.get_between_bounds(&RangeQuery::new().gte(Value::from(5))),
            vec![h[0], h[2], h[1]]
        );
        assert_eq!(index.get_all(), vec![h[0], h[2], h[1]]);
    }

    #[test]
    fn matching_array_key_deduplicates() {
        let mut arena = DocArena::new();
        let h = store(
            &mut arena,
            vec![json!({"t": ["x", "y"]}), json!({"t": "y"}), json!({"t": "z"})],
        );
        let mut index = Index::new(IndexOptions::new("t"));
        index.insert_many(&refs(&arena, &h)).unwrap();

        let found = index.get_matching(&Value::Array(vec![Value::from("x"), Value::from("y")]));
        assert_eq!(sorted(found), vec![h[0], h[1]]);
    }

    #[test]
    fn array_elements_indexed_once_each() {
        let mut arena = DocArena::new();
        let h = store(&mut arena, vec![json!({"t": ["a", "b", "a"]})]);
        let mut index = Index::new(IndexOptions::new("t").unique());
        index.insert(refs(&arena, &h)[0]).unwrap();

        assert_eq!(index.key_count(), 2);
        assert_eq!(index.get_matching(&Value::from("a")), vec![h[0]]);
        assert_eq!(index.get_all(), vec![h[0]]);
    }

    #[test]
    fn distinct_elements_are_type_aware() {
        let mut arena = DocArena::new();
        let h = store(&mut arena, vec![json!({"t": [true, "true", 1, "1"]})]);
        let mut index = Index::new(IndexOptions::new("t").unique());
        index.insert(refs(&arena, &h)[0]).unwrap();
        assert_eq!(index.key_count(), 4);
    }

    #[test]
    fn sparse_skips_undefined() {
        let mut arena = DocArena::new();
        let h = store(&mut arena, vec![json!({"b": 1}), json!({"b": 2}), json!({"a": 1})]);
        let mut index = Index::new(IndexOptions::new("a").unique().sparse());
        index.insert_many(&refs(&arena, &h)).unwrap();
        assert_eq!(index.get_all(), vec![h[2]]);

        index.remove(refs(&arena, &h)[0]);
        assert_eq!(index.get_all(), vec![h[2]]);
    }

    #[test]
    fn non_sparse_unique_rejects_two_undefined() {
        let mut arena = DocArena::new();
        let h = store(&mut arena, vec![json!({"b": 1}), json!({"b": 2})]);
        let mut index = Index::new(IndexOptions::new("a").unique());
        let err = index.insert_many(&refs(&arena, &h)).unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolation { key: None, .. }));
        assert!(index.get_all().is_empty());
    }

    #[test]
    fn multi_key_violation_rolls_back_document() {
        let mut arena = DocArena::new();
        let h = store(&mut arena, vec![json!({"t": "b"}), json!({"t": ["a", "b", "c"]})]);
        let mut index = Index::new(IndexOptions::new("t").unique());
        index.insert(refs(&arena, &h)[0]).unwrap();

        let err = index.insert(refs(&arena, &h)[1]).unwrap_err();
        match err {
            CoreError::UniqueViolation { field, key } => {
                assert_eq!(field, "t");
                assert_eq!(key, Some(Value::from("b")));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(index.get_matching(&Value::from("a")).is_empty());
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn batch_violation_rolls_back_batch() {
        let mut arena = DocArena::new();
        let h = store(
            &mut arena,
            vec![json!({"u": 1}), json!({"u": 2}), json!({"u": 3}), json!({"u": 1})],
        );
        let mut index = Index::new(IndexOptions::new("u").unique());
        index.insert(refs(&arena, &h)[0]).unwrap();

        let batch = refs(&arena, &h[1..]);
        assert!(index.insert_many(&batch).is_err());
        assert_eq!(index.get_all(), vec![h[0]]);
        index.check_invariants().unwrap();
    }

    #[test]
    fn update_restores_on_failure() {
        let mut arena = DocArena::new();
        let h = store(
            &mut arena,
            vec![json!({"u": 1}), json!({"u": 2}), json!({"u": 2, "v": 0})],
        );
        let mut index = Index::new(IndexOptions::new("u").unique());
        index.insert_many(&refs(&arena, &h[..2])).unwrap();

        let r = refs(&arena, &h);
        assert!(index.update(r[0], r[2]).is_err());
        assert_eq!(index.get_matching(&Value::from(1)), vec![h[0]]);
        assert_eq!(index.get_matching(&Value::from(2)), vec![h[1]]);
    }

    #[test]
    fn update_many_is_one_batch() {
        let mut arena = DocArena::new();
        let h = store(
            &mut arena,
            vec![
                json!({"u": 1}),
                json!({"u": 2}),
                json!({"u": 2}),
                json!({"u": 1}),
                json!({"u": 3}),
                json!({"u": 3}),
            ],
        );
        let r = refs(&arena, &h);
        let mut index = Index::new(IndexOptions::new("u").unique());
        index.insert_many(&r[..2]).unwrap();

        // Swapping keys succeeds because all olds leave before news arrive
        let swap = [(r[0], r[2]), (r[1], r[3])];
        index.update_many(&swap).unwrap();
        assert_eq!(index.get_matching(&Value::from(1)), vec![h[3]]);
        assert_eq!(index.get_matching(&Value::from(2)), vec![h[2]]);

        index.revert_update(&swap).unwrap();
        assert_eq!(index.get_matching(&Value::from(1)), vec![h[0]]);
        assert_eq!(index.get_matching(&Value::from(2)), vec![h[1]]);

        // Two new versions colliding on 3 fail as a whole
        let clash = [(r[0], r[4]), (r[1], r[5])];
        assert!(index.update_many(&clash).is_err());
        assert_eq!(index.get_matching(&Value::from(1)), vec![h[0]]);
        assert_eq!(index.get_matching(&Value::from(2)), vec![h[1]]);
        assert!(index.get_matching(&Value::from(3)).is_empty());
    }

    #[test]
    fn nested_field() {
        let mut arena = DocArena::new();
        let h = store(&mut arena, vec![json!({"p": {"age": 3}}), json!({"p": {"age": 1}})]);
        let mut index = Index::new(IndexOptions::new("p.age"));
        index.insert_many(&refs(&arena, &h)).unwrap();
        assert_eq!(index.get_all(), vec![h[1], h[0]]);
    }

    proptest! {
        #[test]
        fn index_mirrors_document_set(values in prop::collection::vec(prop::option::of(0i64..20), 1..60), removals in prop::collection::vec(any::<prop::sample::Index>(), 0..30)) {
            let mut arena = DocArena::new();
            let handles: Vec<DocHandle> = values
                .iter()
                .map(|v| {
                    let mut d = Document::new();
                    if let Some(v) = v {
                        d.insert("k".into(), Value::from(*v));
                    }
                    arena.insert(d)
                })
                .collect();

            let mut index = Index::new(IndexOptions::new("k").sparse());
            index.insert_many(&refs(&arena, &handles)).unwrap();

            let mut live: Vec<DocHandle> = handles.clone();
            for pick in removals {
                if live.is_empty() {
                    break;
                }
                let h = live.remove(pick.index(live.len()));
                index.remove((h, arena.get(h).unwrap()));
            }

            let expected: Vec<DocHandle> = sorted(
                live.into_iter()
                    .filter(|h| arena.get(*h).unwrap().contains_key("k"))
                    .collect(),
            );
            prop_assert_eq!(sorted(index.get_all()), expected);
            prop_assert!(index.check_invariants().is_ok());
        }
    }
}
