//! Ordered tree used by every index.
//!
//! The tree knows nothing about documents: it maps comparable keys to lists
//! of payloads and keeps itself height-balanced.

mod avl;
mod range;

pub use avl::{AvlTree, Comparator, DuplicateKey, NodeId};
pub use range::RangeQuery;
