//! # EmberDB Testkit
//!
//! Test utilities for EmberDB.
//!
//! This crate provides:
//! - Test fixtures and datastore helpers
//! - Property-based test generators using proptest
//! - A crash recovery harness for the log files
//! - A model-checking harness comparing a datastore against a plain map
//!
//! ## Usage
//!
//! ```rust,ignore
//! use emberdb_testkit::prelude::*;
//!
//! #[test]
//! fn finds_inserted_documents() {
//!     with_temp_store(|store| {
//!         store.insert(doc(json!({"name": "ann"}))).unwrap();
//!         assert_eq!(store.count(&query(json!({"name": "ann"}))).unwrap(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use serde_json::json;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
