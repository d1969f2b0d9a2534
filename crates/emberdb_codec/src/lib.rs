//! # EmberDB Codec
//!
//! Document values and their on-disk encoding for EmberDB.
//!
//! This crate provides:
//! - [`Value`], the dynamic value stored in documents
//! - [`compare_values`], the total order used by indexes and sorting
//! - Dotted-path access ([`get_path`], [`set_path`], [`unset_path`])
//! - Field-name and value validation ([`check_document`])
//! - One-document-per-line JSON encoding ([`to_line`], [`from_line`])
//!
//! ## Usage
//!
//! ```
//! use emberdb_codec::{document_from_line, document_to_line, get_path, Value};
//!
//! let doc = document_from_line(r#"{"_id":"a","user":{"age":31}}"#).unwrap();
//! assert_eq!(get_path(&doc, "user.age"), Some(Value::from(31)));
//! assert_eq!(document_to_line(&doc).unwrap(), r#"{"_id":"a","user":{"age":31}}"#);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod path;
mod value;

pub use decoder::{document_from_line, from_line};
pub use encoder::{document_to_line, to_line, DATE_KEY};
pub use error::{CodecError, CodecResult};
pub use path::{
    check_document, check_field_name, get_path, get_value_path, set_path, unset_path,
    PATH_SEPARATOR, RESERVED_PREFIX,
};
pub use value::{compare_optional, compare_values, truncate_dates, Document, Map, Value};
