//! Dotted field paths and field-name validation.
//!
//! A path such as `"address.city"` walks nested objects. A numeric segment
//! indexes into an array (`"tags.0"`); any other segment applied to an array
//! is mapped over its elements, so `"items.price"` on
//! `{items: [{price: 1}, {price: 2}]}` yields `[1, 2]`.

use crate::error::{CodecError, CodecResult};
use crate::value::{Map, Value};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Prefix reserved for operators and internal directives.
pub const RESERVED_PREFIX: char = '$';

/// Looks up a dotted path in a document.
///
/// Returns `None` when any step of the path is missing.
#[must_use]
pub fn get_path(doc: &Map, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    lookup_in_map(doc, &parts)
}

/// Looks up a dotted path starting from an arbitrary value.
#[must_use]
pub fn get_value_path(value: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    lookup(value, &parts)
}

fn lookup_in_map(map: &Map, parts: &[&str]) -> Option<Value> {
    let (first, rest) = parts.split_first()?;
    let field = map.get(*first)?;
    if rest.is_empty() {
        return Some(field.clone());
    }

    match field {
        Value::Array(items) => match rest[0].parse::<usize>() {
            Ok(i) => lookup(items.get(i)?, &rest[1..]),
            Err(_) => Some(Value::Array(
                items.iter().filter_map(|item| lookup(item, rest)).collect(),
            )),
        },
        other => lookup(other, rest),
    }
}

fn lookup(value: &Value, parts: &[&str]) -> Option<Value> {
    if parts.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => lookup_in_map(map, parts),
        _ => None,
    }
}

/// Sets the value at a dotted path, creating intermediate objects.
///
/// # Errors
///
/// Returns [`CodecError::InvalidPath`] if an intermediate step is a
/// primitive, or an array addressed by a non-numeric segment or by an index
/// beyond its length. An index equal to the length appends.
pub fn set_path(doc: &mut Map, path: &str, value: Value) -> CodecResult<()> {
    let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    set_in_map(doc, &parts, value, path)
}

fn set_in_map(map: &mut Map, parts: &[&str], value: Value, path: &str) -> CodecResult<()> {
    let Some((first, rest)) = parts.split_first() else {
        return Err(CodecError::invalid_path(path, "empty path"));
    };
    if rest.is_empty() {
        map.insert((*first).to_string(), value);
        return Ok(());
    }

    let slot = map
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_in_value(slot, rest, value, path)
}

fn set_in_value(target: &mut Value, parts: &[&str], value: Value, path: &str) -> CodecResult<()> {
    match target {
        Value::Object(map) => set_in_map(map, parts, value, path),
        Value::Array(items) => {
            let index: usize = parts[0].parse().map_err(|_| {
                CodecError::invalid_path(path, "array step must be a numeric index")
            })?;
            if index > items.len() {
                return Err(CodecError::invalid_path(
                    path,
                    format!("index {index} is past the end of an array of length {}", items.len()),
                ));
            }
            if index == items.len() {
                items.push(Value::Null);
            }
            if parts.len() == 1 {
                items[index] = value;
                Ok(())
            } else {
                if !matches!(items[index], Value::Object(_) | Value::Array(_)) {
                    items[index] = Value::Object(Map::new());
                }
                set_in_value(&mut items[index], &parts[1..], value, path)
            }
        }
        other => Err(CodecError::invalid_path(
            path,
            format!("cannot create a field inside a {}", other.type_name()),
        )),
    }
}

/// Removes the value at a dotted path.
///
/// Returns the removed value, or `None` if the path did not exist.
pub fn unset_path(doc: &mut Map, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    unset_in_map(doc, &parts)
}

fn unset_in_map(map: &mut Map, parts: &[&str]) -> Option<Value> {
    let (first, rest) = parts.split_first()?;
    if rest.is_empty() {
        return map.remove(*first);
    }
    match map.get_mut(*first)? {
        Value::Object(inner) => unset_in_map(inner, rest),
        _ => None,
    }
}

/// Checks that a single field name may be stored.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFieldName`] if the name starts with `$` or
/// contains `.`.
pub fn check_field_name(name: &str) -> CodecResult<()> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(CodecError::invalid_field_name(
            name,
            "field names cannot begin with the $ character",
        ));
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(CodecError::invalid_field_name(
            name,
            "field names cannot contain a .",
        ));
    }
    Ok(())
}

/// Recursively validates every field name and value of a document,
/// including those nested in objects and arrays.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFieldName`] for the first bad name, or
/// [`CodecError::InvalidValue`] for a number that is NaN or infinite.
pub fn check_document(doc: &Map) -> CodecResult<()> {
    for (name, value) in doc {
        check_field_name(name)?;
        check_value(name, value)?;
    }
    Ok(())
}

fn check_value(field: &str, value: &Value) -> CodecResult<()> {
    match value {
        Value::Number(n) if !n.is_finite() => Err(CodecError::invalid_value(
            field,
            format!("{n} cannot be stored, numbers must be finite"),
        )),
        Value::Object(map) => check_document(map),
        Value::Array(items) => items.iter().try_for_each(|item| check_value(field, item)),
        _ => Ok(()),
    }
}
