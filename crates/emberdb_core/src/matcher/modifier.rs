//! Update application for [`BasicMatcher`](super::BasicMatcher).

use crate::error::{CoreError, CoreResult};
use crate::persistence::ID_FIELD;
use emberdb_codec::{
    check_document, compare_values, get_path, set_path, unset_path, Document, Map, Value,
    RESERVED_PREFIX,
};
use std::cmp::Ordering;

pub(crate) fn is_modifier_update(update: &Map) -> CoreResult<bool> {
    let modifiers = update
        .keys()
        .filter(|k| k.starts_with(RESERVED_PREFIX))
        .count();
    if modifiers == 0 {
        Ok(false)
    } else if modifiers == update.len() {
        Ok(true)
    } else {
        Err(CoreError::validation(
            "cannot mix modifiers and normal fields in one update",
        ))
    }
}

pub(crate) fn modify(doc: &Document, update: &Map) -> CoreResult<Document> {
    let mut result = if is_modifier_update(update)? {
        let mut result = doc.clone();
        for (modifier, arguments) in update {
            let fields = arguments.as_object().ok_or_else(|| {
                CoreError::validation(format!("{modifier} expects an object of fields"))
            })?;
            for (path, argument) in fields {
                apply(&mut result, modifier, path, argument)?;
            }
        }
        result
    } else {
        update.clone()
    };

    match (doc.get(ID_FIELD), result.get(ID_FIELD)) {
        (Some(old), Some(new)) if compare_values(old, new) != Ordering::Equal => {
            return Err(CoreError::validation("a document's _id cannot be changed"));
        }
        (Some(old), None) => {
            result.insert(ID_FIELD.to_string(), old.clone());
        }
        _ => {}
    }

    check_document(&result)?;
    Ok(result)
}

fn apply(doc: &mut Document, modifier: &str, path: &str, argument: &Value) -> CoreResult<()> {
    match modifier {
        "$set" => set_path(doc, path, argument.clone())?,
        "$unset" => {
            unset_path(doc, path);
        }
        "$inc" => {
            let step = argument
                .as_f64()
                .ok_or_else(|| CoreError::validation(format!("$inc on {path} needs a number")))?;
            let next = match get_path(doc, path) {
                None => step,
                Some(Value::Number(current)) => current + step,
                Some(other) => {
                    return Err(CoreError::validation(format!(
                        "cannot $inc the {} field {path}",
                        other.type_name()
                    )))
                }
            };
            set_path(doc, path, Value::Number(next))?;
        }
        "$push" => {
            let (items, slice) = each_argument(modifier, argument, true)?;
            let mut array = current_array(doc, modifier, path)?;
            array.extend(items);
            if let Some(slice) = slice {
                array = apply_slice(array, slice);
            }
            set_path(doc, path, Value::Array(array))?;
        }
        "$addToSet" => {
            let (items, _) = each_argument(modifier, argument, false)?;
            let mut array = current_array(doc, modifier, path)?;
            for item in items {
                if !array
                    .iter()
                    .any(|existing| compare_values(existing, &item) == Ordering::Equal)
                {
                    array.push(item);
                }
            }
            set_path(doc, path, Value::Array(array))?;
        }
        "$pop" => {
            let direction = argument
                .as_f64()
                .ok_or_else(|| CoreError::validation("$pop expects a number"))?;
            let Some(Value::Array(mut array)) = get_path(doc, path) else {
                return Err(CoreError::validation(format!(
                    "cannot $pop from {path}, which is not an array"
                )));
            };
            if direction > 0.0 {
                array.pop();
            } else if direction < 0.0 && !array.is_empty() {
                array.remove(0);
            }
            set_path(doc, path, Value::Array(array))?;
        }
        "$min" | "$max" => {
            let wanted = if modifier == "$min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let replace = match get_path(doc, path) {
                None => true,
                Some(current) => compare_values(argument, &current) == wanted,
            };
            if replace {
                set_path(doc, path, argument.clone())?;
            }
        }
        other => return Err(CoreError::validation(format!("unknown modifier {other}"))),
    }
    Ok(())
}

/// Reads the array at `path`; a missing field is an empty array.
fn current_array(doc: &Document, modifier: &str, path: &str) -> CoreResult<Vec<Value>> {
    match get_path(doc, path) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(CoreError::validation(format!(
            "cannot {modifier} onto {path}, which is not an array"
        ))),
    }
}

/// Splits a `$push`/`$addToSet` argument into the items to add and an
/// optional `$slice`.
fn each_argument(
    modifier: &str,
    argument: &Value,
    allow_slice: bool,
) -> CoreResult<(Vec<Value>, Option<i64>)> {
    let Some(map) = argument.as_object().filter(|m| m.contains_key("$each")) else {
        return Ok((vec![argument.clone()], None));
    };

    let items = map
        .get("$each")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| CoreError::validation(format!("{modifier} $each expects an array")))?;

    let mut slice = None;
    for key in map.keys() {
        match key.as_str() {
            "$each" => {}
            "$slice" if allow_slice => {
                let n = map
                    .get("$slice")
                    .and_then(Value::as_f64)
                    .filter(|n| n.fract() == 0.0)
                    .ok_or_else(|| CoreError::validation("$slice expects a whole number"))?;
                slice = Some(n as i64);
            }
            other => {
                return Err(CoreError::validation(format!(
                    "{modifier} does not accept {other} next to $each"
                )))
            }
        }
    }
    Ok((items, slice))
}

/// Keeps the first `n` items, or the last `-n` when negative.
fn apply_slice(mut items: Vec<Value>, n: i64) -> Vec<Value> {
    let len = items.len();
    let keep = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(len);
    if n >= 0 {
        items.truncate(keep);
        items
    } else {
        items.split_off(len - keep)
    }
}
