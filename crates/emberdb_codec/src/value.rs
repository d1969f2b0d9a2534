//! Dynamic document value type.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Field map of an object value.
pub type Map = BTreeMap<String, Value>;

/// A stored document: an open map of field names to values.
pub type Document = Map;

/// A dynamic document value.
///
/// A missing ("undefined") field is represented by the absence of the key,
/// i.e. `Option::None` wherever a lookup may come up empty.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Text string.
    String(String),
    /// Point in time, millisecond precision on disk.
    Date(DateTime<Utc>),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested object.
    Object(Map),
}

impl Value {
    /// Position of this value's type in the cross-type total order.
    ///
    /// `0` is reserved for undefined.
    #[must_use]
    pub const fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Bool(_) => 4,
            Value::Date(_) => 5,
            Value::Array(_) => 6,
            Value::Object(_) => 7,
        }
    }

    /// Name of the value's type, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Returns true for values that are neither arrays nor objects.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Returns the string slice if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a number.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the timestamp if this is a date.
    #[must_use]
    pub const fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the elements if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the fields if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the fields mutably if this is an object.
    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Consumes the value, returning the fields if this is an object.
    #[must_use]
    pub fn into_object(self) -> Option<Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Drops sub-millisecond precision from this value and every date nested
    /// inside it, so it equals what the line encoding reads back.
    pub fn truncate_dates(&mut self) {
        match self {
            Value::Date(d) => {
                if let Some(ms) = DateTime::<Utc>::from_timestamp_millis(d.timestamp_millis()) {
                    *d = ms;
                }
            }
            Value::Array(items) => items.iter_mut().for_each(Value::truncate_dates),
            Value::Object(map) => truncate_dates(map),
            _ => {}
        }
    }
}

/// Truncates every date in a document to millisecond precision.
pub fn truncate_dates(doc: &mut Map) {
    doc.values_mut().for_each(Value::truncate_dates);
}

/// Compares two values under the store-wide total order.
///
/// Types are ordered `null < number < string < boolean < date < array <
/// object`; values of the same type compare by value. Arrays compare element
/// by element, then by length. Objects compare their fields in key order (key
/// first, then value), then by field count.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = a.type_rank().cmp(&b.type_rank());
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or_else(|| x.total_cmp(y)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_values(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                let key_ord = xk.cmp(yk);
                if key_ord != Ordering::Equal {
                    return key_ord;
                }
                let val_ord = compare_values(xv, yv);
                if val_ord != Ordering::Equal {
                    return val_ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal, // Same rank implies same variant
    }
}

/// Compares two possibly-undefined values; undefined sorts before everything.
#[must_use]
pub fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(ms: i64) -> Value {
        Value::Date(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn cross_type_order() {
        let ordered = vec![
            Value::Null,
            Value::from(-3),
            Value::from(12.5),
            Value::from(""),
            Value::from("abc"),
            Value::from(false),
            Value::from(true),
            date(0),
            Value::Array(vec![]),
            Value::Object(Map::new()),
        ];
        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                assert_eq!(compare_values(a, b), i.cmp(&j), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn undefined_sorts_first() {
        assert_eq!(compare_optional(None, Some(&Value::Null)), Ordering::Less);
        assert_eq!(compare_optional(None, None), Ordering::Equal);
        assert_eq!(compare_optional(Some(&Value::Null), None), Ordering::Greater);
    }

    #[test]
    fn same_textual_form_different_types() {
        assert_ne!(
            compare_values(&Value::from(true), &Value::from("true")),
            Ordering::Equal
        );
        assert_ne!(compare_values(&Value::from(1), &Value::from("1")), Ordering::Equal);
    }

    #[test]
    fn arrays_compare_elementwise_then_length() {
        let a = Value::Array(vec![Value::from(1), Value::from(2)]);
        let b = Value::Array(vec![Value::from(1), Value::from(3)]);
        let c = Value::Array(vec![Value::from(1)]);
        assert_eq!(compare_values(&a, &b), Ordering::Less);
        assert_eq!(compare_values(&c, &a), Ordering::Less);
        assert_eq!(compare_values(&a, &a.clone()), Ordering::Equal);
    }

    #[test]
    fn objects_compare_by_sorted_fields() {
        let mut x = Map::new();
        x.insert("a".into(), Value::from(1));
        let mut y = Map::new();
        y.insert("a".into(), Value::from(2));
        let mut z = Map::new();
        z.insert("a".into(), Value::from(1));
        z.insert("b".into(), Value::from(0));

        assert_eq!(
            compare_values(&Value::Object(x.clone()), &Value::Object(y)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Object(x), &Value::Object(z)),
            Ordering::Less
        );
    }

    #[test]
    fn dates_compare_chronologically() {
        assert_eq!(compare_values(&date(5), &date(10)), Ordering::Less);
        assert_eq!(compare_values(&date(10), &date(10)), Ordering::Equal);
    }

    #[test]
    fn truncate_dates_reaches_nested_values() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let mut doc = Map::new();
        doc.insert("at".into(), Value::Date(precise));
        doc.insert(
            "log".into(),
            Value::Array(vec![Value::Object(
                [("when".to_string(), Value::Date(precise))].into_iter().collect(),
            )]),
        );

        truncate_dates(&mut doc);

        let expected = date(1_700_000_000_123);
        assert_eq!(doc["at"], expected);
        let inner = doc["log"].as_array().unwrap()[0].as_object().unwrap();
        assert_eq!(inner["when"], expected);
    }

    #[test]
    fn truncate_dates_rounds_pre_epoch_toward_past() {
        let mut v = Value::Date(Utc.timestamp_opt(-1, 999_999_999).unwrap());
        v.truncate_dates();
        assert_eq!(v, date(-1));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(2).as_f64(), Some(2.0));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::Array(vec![]).as_array().is_some());
        assert!(!Value::Array(vec![]).is_primitive());
        assert!(Value::Null.is_primitive());
        assert_eq!(Value::Null.type_name(), "null");
    }
}
