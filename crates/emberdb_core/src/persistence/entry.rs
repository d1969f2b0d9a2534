//! Log entries and their line encoding.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexOptions;
use emberdb_codec::{document_from_line, document_to_line, Document, Map, Value};
use emberdb_storage::LogKind;

/// Identity field of every document.
pub const ID_FIELD: &str = "_id";

const DELETED_MARKER: &str = "$$deleted";
const INDEX_CREATED_MARKER: &str = "$$indexCreated";
const INDEX_REMOVED_MARKER: &str = "$$indexRemoved";

/// One line of a log.
///
/// Markers use a `$$` prefix, which stored field names can never start
/// with, so a directive is never mistaken for a document.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// Current state of a document.
    Document(Document),
    /// The document with this `_id` was removed.
    Tombstone(Value),
    /// An index was created.
    IndexCreated(IndexOptions),
    /// The index on this field was removed.
    IndexRemoved(String),
}

impl LogEntry {
    /// Returns the log this entry is appended to.
    #[must_use]
    pub fn kind(&self) -> LogKind {
        match self {
            Self::Document(_) | Self::Tombstone(_) => LogKind::Data,
            Self::IndexCreated(_) | Self::IndexRemoved(_) => LogKind::Index,
        }
    }

    /// Encodes the entry as a single line.
    ///
    /// # Errors
    ///
    /// Returns a codec error if a value cannot be encoded.
    pub fn to_line(&self) -> CoreResult<String> {
        let line = match self {
            Self::Document(doc) => document_to_line(doc)?,
            Self::Tombstone(id) => {
                let mut map = Map::new();
                map.insert(DELETED_MARKER.into(), Value::Bool(true));
                map.insert(ID_FIELD.into(), id.clone());
                document_to_line(&map)?
            }
            Self::IndexCreated(options) => {
                let mut map = Map::new();
                map.insert(INDEX_CREATED_MARKER.into(), options.to_value());
                document_to_line(&map)?
            }
            Self::IndexRemoved(field) => {
                let mut map = Map::new();
                map.insert(INDEX_REMOVED_MARKER.into(), Value::from(field.as_str()));
                document_to_line(&map)?
            }
        };
        Ok(line)
    }

    /// Decodes a line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a JSON object, or is a document
    /// or tombstone without an `_id`, or a directive without a field name.
    pub fn parse(line: &str) -> CoreResult<Self> {
        let mut map = document_from_line(line)?;

        if let Some(options) = map.get(INDEX_CREATED_MARKER) {
            return Ok(Self::IndexCreated(IndexOptions::from_value(options)?));
        }
        if let Some(field) = map.get(INDEX_REMOVED_MARKER) {
            return field
                .as_str()
                .map(|f| Self::IndexRemoved(f.to_string()))
                .ok_or_else(|| CoreError::validation("index removal without a field name"));
        }

        let id = map
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| CoreError::validation("log entry without an _id"))?;
        if map.remove(DELETED_MARKER) == Some(Value::Bool(true)) {
            return Ok(Self::Tombstone(id));
        }
        Ok(Self::Document(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Value::from(value).into_object().unwrap()
    }

    #[test]
    fn document_line() {
        let entry = LogEntry::Document(doc(json!({"_id": "a", "n": 1})));
        let line = entry.to_line().unwrap();
        assert_eq!(line, r#"{"_id":"a","n":1}"#);
        assert_eq!(LogEntry::parse(&line).unwrap(), entry);
        assert_eq!(entry.kind(), LogKind::Data);
    }

    #[test]
    fn tombstone_line() {
        let entry = LogEntry::Tombstone(Value::from("a"));
        let line = entry.to_line().unwrap();
        assert_eq!(line, r#"{"$$deleted":true,"_id":"a"}"#);
        assert_eq!(LogEntry::parse(&line).unwrap(), entry);
    }

    #[test]
    fn index_directives() {
        let created = LogEntry::IndexCreated(IndexOptions::new("age").unique());
        let line = created.to_line().unwrap();
        assert_eq!(LogEntry::parse(&line).unwrap(), created);
        assert_eq!(created.kind(), LogKind::Index);

        let removed = LogEntry::IndexRemoved("age".into());
        let line = removed.to_line().unwrap();
        assert_eq!(line, r#"{"$$indexRemoved":"age"}"#);
        assert_eq!(LogEntry::parse(&line).unwrap(), removed);
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(LogEntry::parse("not json").is_err());
        assert!(LogEntry::parse("[1,2]").is_err());
        assert!(LogEntry::parse(r#"{"n":1}"#).is_err());
        assert!(LogEntry::parse(r#"{"$$indexCreated":{"unique":true}}"#).is_err());
        assert!(LogEntry::parse(r#"{"$$indexRemoved":3}"#).is_err());
    }
}
