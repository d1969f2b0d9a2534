//! Test fixtures and datastore helpers.
//!
//! Provides convenience functions for setting up test datastores
//! and common test scenarios.

use emberdb_core::{Config, Datastore, Document, IndexOptions, Map, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds a document from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
pub fn doc(value: serde_json::Value) -> Document {
    Value::from(value)
        .into_object()
        .expect("document literal must be a JSON object")
}

/// Builds a query, update or projection from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
pub fn query(value: serde_json::Value) -> Map {
    doc(value)
}

/// A test datastore with automatic cleanup.
pub struct TestStore {
    /// The datastore instance.
    pub store: Datastore,
    path: Option<PathBuf>,
    /// Kept alive so the files outlive the store.
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory test datastore.
    pub fn memory() -> Self {
        Self {
            store: Datastore::open(Config::new().rng_seed(42))
                .expect("Failed to open in-memory datastore"),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a file-backed test datastore in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(|config| config)
    }

    /// Creates a file-backed test datastore, letting `configure` adjust the
    /// configuration. The filename is set before `configure` runs.
    pub fn file_with(configure: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.db");
        let store = Datastore::open(configure(Config::new().filename(&path)))
            .expect("Failed to open file datastore");
        Self {
            store,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data log path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the datastore and opens it again from its files.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory store or if reopening fails.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            path,
            _temp_dir,
        } = self;
        drop(store);
        let file = path.clone().expect("Only file datastores can be reopened");
        Self {
            store: Datastore::open(Config::new().filename(file))
                .expect("Failed to reopen datastore"),
            path,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Datastore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory datastore.
///
/// # Example
///
/// ```rust,ignore
/// use emberdb_testkit::{doc, with_temp_store};
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.insert(doc(json!({"a": 1}))).unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Datastore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-backed datastore.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Datastore, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store
        .path()
        .expect("File datastore should have a path")
        .to_path_buf();
    f(&test_store.store, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a datastore holding `count` documents `{_id: "d<i>", n: i}`.
    pub fn populated_store(count: usize) -> TestStore {
        let test_store = TestStore::memory();
        let docs = (0..count)
            .map(|i| doc(serde_json::json!({"_id": format!("d{i}"), "n": i})))
            .collect();
        test_store
            .insert_many(docs)
            .expect("Failed to insert documents");
        test_store
    }

    /// Creates a datastore of people with a unique index on `email` and a
    /// plain index on `age`.
    pub fn people_store() -> TestStore {
        let test_store = TestStore::memory();
        test_store
            .ensure_index(IndexOptions::new("email").unique())
            .expect("Failed to create email index");
        test_store
            .ensure_index(IndexOptions::new("age"))
            .expect("Failed to create age index");
        let people = [("ann", 31), ("bob", 25), ("cid", 42), ("dee", 25)];
        for (name, age) in people {
            test_store
                .insert(doc(serde_json::json!({
                    "name": name,
                    "email": format!("{name}@example.com"),
                    "age": age,
                })))
                .expect("Failed to insert person");
        }
        test_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store() {
        let test_store = TestStore::memory();
        assert!(test_store.path().is_none());
        assert!(test_store.is_empty().unwrap());
    }

    #[test]
    fn test_file_store_reopens() {
        let test_store = TestStore::file();
        test_store.insert(doc(json!({"_id": "a"}))).unwrap();
        let test_store = test_store.reopen();
        assert_eq!(test_store.len().unwrap(), 1);
    }

    #[test]
    fn test_with_temp_store() {
        let count = with_temp_store(|store| {
            store.insert(doc(json!({"a": 1}))).unwrap();
            store.count(&query(json!({}))).unwrap()
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_scenarios() {
        assert_eq!(scenarios::populated_store(10).len().unwrap(), 10);
        let people = scenarios::people_store();
        assert_eq!(people.count(&query(json!({"age": 25}))).unwrap(), 2);
        assert_eq!(people.index_names().unwrap(), vec!["_id", "age", "email"]);
    }
}
