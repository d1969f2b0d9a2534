//! # EmberDB Core
//!
//! Embedded document store engine for EmberDB.
//!
//! This crate provides:
//! - [`Datastore`]: an in-memory document collection persisted to an
//!   append-only data log and index log
//! - Field indexes (unique, sparse, TTL) over a randomized-deletion AVL tree
//! - A FIFO operation queue serializing every read and write
//! - MongoDB-style queries, modifiers and [`Cursor`]s with sort, skip,
//!   limit and projection
//! - Crash-safe compaction, on demand or on a timer
//!
//! ## Example
//!
//! ```rust
//! use emberdb_core::{Datastore, IndexOptions, Map, Value};
//!
//! let store = Datastore::in_memory().unwrap();
//! store.ensure_index(IndexOptions::new("name").unique()).unwrap();
//!
//! let mut doc = Map::new();
//! doc.insert("name".to_string(), Value::from("ann"));
//! let stored = store.insert(doc).unwrap();
//! assert!(stored.contains_key("_id"));
//!
//! let mut query = Map::new();
//! query.insert("name".to_string(), Value::from("ann"));
//! assert_eq!(store.count(&query).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arena;
mod config;
#[cfg(feature = "encryption")]
pub mod crypto;
mod cursor;
mod datastore;
mod error;
mod executor;
mod id;
mod index;
mod matcher;
mod persistence;
mod tree;

pub use arena::{DocArena, DocHandle};
pub use config::{Config, MIN_AUTO_COMPACTION_INTERVAL};
pub use cursor::{Cursor, SortOrder};
pub use datastore::{
    Datastore, RemoveOptions, UpdateOptions, UpdateResult, CREATED_AT, UPDATED_AT,
};
pub use error::{CoreError, CoreResult};
pub use executor::Executor;
pub use id::{generate_unique_id, new_id};
pub use index::{DocRef, Index, IndexKey, IndexOptions};
pub use matcher::{is_modifier_update, BasicMatcher, DocumentMatcher};
pub use persistence::{
    verify_transform, FnTransform, IdentityTransform, LineTransform, LoadedState, LogEntry,
    Persistence, DEFAULT_CORRUPT_ALERT_THRESHOLD, ID_FIELD,
};
pub use tree::{AvlTree, Comparator, DuplicateKey, NodeId, RangeQuery};

// Document model re-exported for convenience
pub use emberdb_codec::{Document, Map, Value};
