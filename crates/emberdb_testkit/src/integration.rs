//! Model-based integration test helpers.
//!
//! [`ModelHarness`] applies operations both to a datastore and to a plain
//! map of expected documents, then checks that the two agree.

use crate::fixtures::{doc, TestStore};
use crate::generators::{stored_form, Operation};
use emberdb_core::{
    CoreError, Datastore, Document, IndexOptions, Map, RemoveOptions, UpdateOptions, Value,
};
use serde_json::json;
use std::collections::BTreeMap;

/// Field indexed by every harness store.
pub const INDEXED_FIELD: &str = "a";

/// A datastore paired with the documents it is expected to hold.
pub struct ModelHarness {
    store: TestStore,
    expected: BTreeMap<String, Document>,
}

impl ModelHarness {
    /// Creates a harness over a file-backed store with an index on
    /// [`INDEXED_FIELD`].
    pub fn new() -> Self {
        let store = TestStore::file();
        store
            .ensure_index(IndexOptions::new(INDEXED_FIELD))
            .expect("Failed to create index");
        Self {
            store,
            expected: BTreeMap::new(),
        }
    }

    /// Returns the datastore under test.
    pub fn store(&self) -> &Datastore {
        &self.store
    }

    /// Returns the expected documents keyed by `_id`.
    pub fn expected(&self) -> &BTreeMap<String, Document> {
        &self.expected
    }

    /// Applies one operation to both the store and the model, checking the
    /// store's answer against the model's.
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::Insert { id, doc: body } => self.insert(&key(*id), body.clone()),
            Operation::Set { id, field, value } => self.set(&key(*id), field, value.clone()),
            Operation::Remove { id } => self.remove(&key(*id)),
            Operation::Compact => self.store.compact_datafile().expect("Failed to compact"),
            Operation::Reload => self.store.load_database().expect("Failed to reload"),
        }
    }

    /// Inserts a document under `id`, expecting a validation error for a
    /// document the store cannot hold and a unique violation if the id is
    /// already taken.
    pub fn insert(&mut self, id: &str, mut body: Document) {
        body.insert("_id".to_string(), Value::from(id));
        let result = self.store.insert(body.clone());
        let Some(body) = stored_form(&body) else {
            assert!(
                result.as_ref().is_err_and(CoreError::is_validation),
                "insert of invalid {id} should fail validation, got {result:?}"
            );
            return;
        };
        if self.expected.contains_key(id) {
            assert!(
                matches!(result, Err(CoreError::UniqueViolation { .. })),
                "duplicate insert of {id} should fail, got {result:?}"
            );
        } else {
            let stored = result.expect("Failed to insert document");
            assert_eq!(stored, body);
            self.expected.insert(id.to_string(), body);
        }
    }

    /// Sets `field` on the document `id`, if present.
    pub fn set(&mut self, id: &str, field: &str, value: Value) {
        let mut fields = Map::new();
        fields.insert(field.to_string(), value);
        let stored = stored_form(&fields);
        let mut update = Map::new();
        update.insert("$set".to_string(), Value::Object(fields));

        let result = self.store.update(&by_id(id), &update, UpdateOptions::new());
        match (self.expected.get_mut(id), stored) {
            (Some(expected), Some(stored)) => {
                let result = result.expect("Failed to update document");
                assert_eq!(result.num_affected, 1);
                expected.extend(stored);
            }
            (Some(_), None) => assert!(
                result.as_ref().is_err_and(CoreError::is_validation),
                "invalid $set on {id} should fail validation, got {result:?}"
            ),
            (None, _) => {
                let result = result.expect("Failed to update document");
                assert_eq!(result.num_affected, 0);
            }
        }
    }

    /// Removes the document `id`, if present.
    pub fn remove(&mut self, id: &str) {
        let removed = self
            .store
            .remove(&by_id(id), RemoveOptions::new())
            .expect("Failed to remove document");
        let expected = usize::from(self.expected.remove(id).is_some());
        assert_eq!(removed, expected, "remove of {id}");
    }

    /// Checks the full store content and every index against the model.
    pub fn verify(&self) {
        self.store.check_indexes().expect("Index invariants broken");

        let mut actual: Vec<Document> = self.store.get_all_data().expect("Failed to read data");
        actual.sort_by_key(|d| d.get("_id").and_then(Value::as_str).map(str::to_owned));
        let expected: Vec<Document> = self.expected.values().cloned().collect();
        assert_eq!(actual, expected, "store content differs from the model");

        for (id, expected) in &self.expected {
            let found = self.store.find_one(&by_id(id)).expect("Failed to query by id");
            assert_eq!(found.as_ref(), Some(expected), "lookup of {id}");

            if let Some(value) = expected.get(INDEXED_FIELD).filter(|v| v.is_primitive()) {
                let mut query = Map::new();
                query.insert(INDEXED_FIELD.to_string(), value.clone());
                let hits = self.store.find(&query).exec().expect("Failed to query index");
                assert!(hits.contains(expected), "index lookup missed {id}");
            }
        }
    }

    /// Closes the store, reopens it from disk and verifies it again.
    pub fn reopen_and_verify(self) -> Self {
        let Self { store, expected } = self;
        let harness = Self {
            store: store.reopen(),
            expected,
        };
        harness.verify();
        harness
    }
}

impl Default for ModelHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn key(id: u8) -> String {
    format!("k{id}")
}

fn by_id(id: &str) -> Map {
    doc(json!({ "_id": id }))
}
