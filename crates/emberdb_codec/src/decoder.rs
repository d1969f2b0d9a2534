//! JSON-line decoding.

use crate::encoder::DATE_KEY;
use crate::error::{CodecError, CodecResult};
use crate::value::{Map, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => {
                if let Some(date) = as_date_marker(&fields) {
                    return date;
                }
                Value::Object(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

fn as_date_marker(fields: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    if fields.len() != 1 {
        return None;
    }
    let millis = fields.get(DATE_KEY)?.as_i64()?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(Value::Date)
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// Decodes a single line into a value.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the line is not valid JSON.
pub fn from_line(line: &str) -> CodecResult<Value> {
    serde_json::from_str(line).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Decodes a single line that must hold an object.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for invalid JSON and
/// [`CodecError::InvalidStructure`] if the line is not an object.
pub fn document_from_line(line: &str) -> CodecResult<Map> {
    match from_line(line)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::invalid_structure(format!(
            "expected an object, found {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::document_to_line;
    use chrono::TimeZone;

    #[test]
    fn decodes_date_marker() {
        let value = from_line(r#"{"$$date":1500}"#).unwrap();
        assert_eq!(value, Value::Date(Utc.timestamp_millis_opt(1_500).unwrap()));
    }

    #[test]
    fn marker_with_extra_fields_stays_an_object() {
        let value = from_line(r#"{"$$date":1500,"x":1}"#).unwrap();
        assert!(matches!(value, Value::Object(_)));
    }

    #[test]
    fn document_survives_line_encoding() {
        let line = r#"{"_id":"k","n":2.25,"nested":{"d":{"$$date":86400000},"list":[1,"a",null,true]}}"#;
        let doc = document_from_line(line).unwrap();
        assert_eq!(document_to_line(&doc).unwrap(), line);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            from_line("{not json"),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn non_object_document_is_an_error() {
        assert!(matches!(
            document_from_line("[1,2]"),
            Err(CodecError::InvalidStructure { .. })
        ));
    }
}
