//! Field indexes.
//!
//! Every index maps the values of one field onto the documents holding
//! them. Indexes store [`DocHandle`](crate::arena::DocHandle)s, never
//! documents, so all indexes of a store are views over the same versions.
//!
//! # Guarantees
//!
//! - Array fields are indexed once per distinct element
//! - Sparse indexes skip documents lacking the field
//! - Failed inserts, removes and updates leave the index untouched

mod field;
mod options;

pub use field::{DocRef, Index, IndexKey};
pub use options::IndexOptions;
