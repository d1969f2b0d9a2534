//! Property-based test generators.
//!
//! Provides proptest strategies for generating test data.
//!
//! Generated values include inputs the store must normalize or refuse:
//! dates with sub-millisecond precision and non-finite numbers. Use
//! [`stored_form`] to get what the store is expected to hold for a document.

use chrono::{DateTime, Utc};
use emberdb_codec::{check_document, truncate_dates};
use emberdb_core::{Document, Map, Value};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

/// Strategy for valid field names: no `$` prefix, no `.`.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}"
}

/// Strategy for finite numbers.
pub fn number_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        any::<i32>().prop_map(f64::from),
        -1.0e9..1.0e9f64,
    ]
}

/// Strategy for numbers that are occasionally NaN or infinite.
pub fn any_number_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        12 => number_strategy(),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
        1 => Just(f64::NAN),
    ]
}

/// Strategy for dates at nanosecond precision, between 1970 and 2100.
pub fn date_strategy() -> impl Strategy<Value = Value> {
    (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        let date = DateTime::<Utc>::from_timestamp(secs, nanos).expect("seconds within chrono range");
        Value::Date(date)
    })
}

/// Strategy for primitive values: null, booleans, numbers, strings and dates.
pub fn primitive_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any_number_strategy().prop_map(Value::Number),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        date_strategy(),
    ]
}

/// Strategy for arbitrary values, nested up to three levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    primitive_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            btree_map(field_name_strategy(), inner, 0..4).prop_map(Value::Object),
        ]
    })
}

/// Strategy for documents without an `_id`.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    btree_map(field_name_strategy(), value_strategy(), 0..6)
}

/// Strategy for flat documents of primitive values, suited to indexing.
pub fn flat_document_strategy() -> impl Strategy<Value = Document> {
    btree_map(field_name_strategy(), primitive_strategy(), 1..5)
}

/// Strategy for a batch of documents with distinct string ids.
pub fn identified_documents_strategy(count: usize) -> impl Strategy<Value = Vec<Document>> {
    vec(document_strategy(), 0..=count).prop_map(|docs| {
        docs.into_iter()
            .enumerate()
            .map(|(i, mut doc)| {
                doc.insert("_id".to_string(), Value::String(format!("doc{i}")));
                doc
            })
            .collect()
    })
}

/// Strategy for `$set` updates of a single field.
pub fn set_update_strategy() -> impl Strategy<Value = Map> {
    (field_name_strategy(), primitive_strategy()).prop_map(|(field, value)| {
        let mut fields = Map::new();
        fields.insert(field, value);
        let mut update = Map::new();
        update.insert("$set".to_string(), Value::Object(fields));
        update
    })
}

/// Returns the document as the store keeps it: dates cut to millisecond
/// precision. Returns `None` if the store must reject it.
pub fn stored_form(doc: &Document) -> Option<Document> {
    let mut stored = doc.clone();
    truncate_dates(&mut stored);
    check_document(&stored).ok().map(|()| stored)
}

/// A datastore operation for model-based testing.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert a document under the given id.
    Insert {
        /// Document id.
        id: u8,
        /// Document body.
        doc: Document,
    },
    /// Set a field on the document with the given id.
    Set {
        /// Document id.
        id: u8,
        /// Field to set.
        field: String,
        /// New value.
        value: Value,
    },
    /// Remove the document with the given id.
    Remove {
        /// Document id.
        id: u8,
    },
    /// Compact the data log.
    Compact,
    /// Reload the datastore from its logs.
    Reload,
}

/// Strategy for a single operation over a small id space, so operations
/// often collide on the same document.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (0u8..8, flat_document_strategy()).prop_map(|(id, doc)| Operation::Insert { id, doc }),
        3 => (0u8..8, field_name_strategy(), primitive_strategy())
            .prop_map(|(id, field, value)| Operation::Set { id, field, value }),
        2 => (0u8..8).prop_map(|id| Operation::Remove { id }),
        1 => Just(Operation::Compact),
        1 => Just(Operation::Reload),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    vec(operation_strategy(), 1..max_len)
}
