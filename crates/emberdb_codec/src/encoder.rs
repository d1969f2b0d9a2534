//! JSON-line encoding.
//!
//! Dates are written as `{"$$date": <milliseconds since epoch>}`; whole
//! numbers that fit losslessly in an `f64` are written without a fraction.

use crate::error::{CodecError, CodecResult};
use crate::value::{Map, Value};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Key under which dates are encoded.
pub const DATE_KEY: &str = "$$date";

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                #[allow(clippy::cast_possible_truncation)]
                if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(d) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DATE_KEY, &d.timestamp_millis())?;
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Encodes a value as a single line (no trailing newline).
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_line(value: &Value) -> CodecResult<String> {
    serde_json::to_string(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Encodes a document as a single line.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn document_to_line(doc: &Map) -> CodecResult<String> {
    serde_json::to_string(doc).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn whole_numbers_have_no_fraction() {
        assert_eq!(to_line(&Value::from(5)).unwrap(), "5");
        assert_eq!(to_line(&Value::from(-2.0)).unwrap(), "-2");
        assert_eq!(to_line(&Value::from(2.5)).unwrap(), "2.5");
    }

    #[test]
    fn dates_use_marker_object() {
        let d = Value::Date(Utc.timestamp_millis_opt(1_500).unwrap());
        assert_eq!(to_line(&d).unwrap(), r#"{"$$date":1500}"#);
    }

    #[test]
    fn documents_encode_on_one_line() {
        let mut doc = Map::new();
        doc.insert("text".into(), Value::from("two\nlines"));
        doc.insert("_id".into(), Value::from("a"));
        let line = document_to_line(&doc).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(line, r#"{"_id":"a","text":"two\nlines"}"#);
    }
}
