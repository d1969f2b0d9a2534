//! Query evaluation for [`BasicMatcher`](super::BasicMatcher).

use crate::error::{CoreError, CoreResult};
use emberdb_codec::{compare_values, get_path, Document, Map, Value, RESERVED_PREFIX};
use regex::Regex;
use std::cmp::Ordering;

pub(crate) fn matches(doc: &Document, query: &Map) -> CoreResult<bool> {
    for (key, condition) in query {
        let matched = if key.starts_with(RESERVED_PREFIX) {
            match_logical(doc, key, condition)?
        } else {
            match_field(doc, key, condition)?
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn match_logical(doc: &Document, operator: &str, argument: &Value) -> CoreResult<bool> {
    match operator {
        "$and" => {
            for query in query_list(operator, argument)? {
                if !matches(doc, query)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$or" => {
            for query in query_list(operator, argument)? {
                if matches(doc, query)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$not" => {
            let query = argument
                .as_object()
                .ok_or_else(|| CoreError::validation("$not expects a query object"))?;
            Ok(!matches(doc, query)?)
        }
        other => Err(CoreError::validation(format!("unknown logical operator {other}"))),
    }
}

fn query_list<'a>(operator: &str, argument: &'a Value) -> CoreResult<Vec<&'a Map>> {
    let items = argument
        .as_array()
        .ok_or_else(|| CoreError::validation(format!("{operator} expects an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_object().ok_or_else(|| {
                CoreError::validation(format!("{operator} expects an array of query objects"))
            })
        })
        .collect()
}

/// Returns the operator map of a condition, or `None` for a plain value.
pub(crate) fn operator_object(condition: &Value) -> CoreResult<Option<&Map>> {
    let Some(map) = condition.as_object() else {
        return Ok(None);
    };
    let operators = map
        .keys()
        .filter(|k| k.starts_with(RESERVED_PREFIX))
        .count();
    if operators == 0 {
        Ok(None)
    } else if operators == map.len() {
        Ok(Some(map))
    } else {
        Err(CoreError::validation(
            "cannot mix operators and normal fields in one condition",
        ))
    }
}

fn match_field(doc: &Document, path: &str, condition: &Value) -> CoreResult<bool> {
    let value = get_path(doc, path);
    let operators = operator_object(condition)?;

    if let Some(Value::Array(items)) = &value {
        if matches!(condition, Value::Array(_)) {
            return Ok(equal(value.as_ref(), condition));
        }
        if let Some(ops) = operators {
            if ops.contains_key("$size") || ops.contains_key("$elemMatch") {
                return match_operators(value.as_ref(), ops);
            }
        }
        for item in items {
            if match_value(Some(item), condition, operators)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    match_value(value.as_ref(), condition, operators)
}

fn match_value(value: Option<&Value>, condition: &Value, operators: Option<&Map>) -> CoreResult<bool> {
    match operators {
        Some(ops) => match_operators(value, ops),
        None => Ok(equal(value, condition)),
    }
}

fn equal(value: Option<&Value>, expected: &Value) -> bool {
    value.is_some_and(|v| compare_values(v, expected) == Ordering::Equal)
}

/// Orders two values only when they are both numbers, strings or dates.
fn comparable(value: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (value?, bound) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Date(_), Value::Date(_)) => value.map(|v| compare_values(v, bound)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        _ => true,
    }
}

fn match_operators(value: Option<&Value>, operators: &Map) -> CoreResult<bool> {
    for (operator, argument) in operators {
        let matched = match operator.as_str() {
            "$eq" => equal(value, argument),
            "$ne" => !equal(value, argument),
            "$lt" => comparable(value, argument) == Some(Ordering::Less),
            "$lte" => matches!(
                comparable(value, argument),
                Some(Ordering::Less | Ordering::Equal)
            ),
            "$gt" => comparable(value, argument) == Some(Ordering::Greater),
            "$gte" => matches!(
                comparable(value, argument),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$in" => in_list(operator, value, argument)?,
            "$nin" => !in_list(operator, value, argument)?,
            "$exists" => truthy(argument) == value.is_some(),
            "$regex" => {
                let pattern = argument
                    .as_str()
                    .ok_or_else(|| CoreError::validation("$regex expects a string pattern"))?;
                let regex = Regex::new(pattern)
                    .map_err(|e| CoreError::validation(format!("invalid $regex: {e}")))?;
                value
                    .and_then(Value::as_str)
                    .is_some_and(|s| regex.is_match(s))
            }
            "$size" => {
                let size = argument
                    .as_f64()
                    .filter(|n| n.fract() == 0.0 && *n >= 0.0)
                    .ok_or_else(|| CoreError::validation("$size expects a whole number"))?;
                #[allow(clippy::cast_precision_loss)]
                let matched = value
                    .and_then(Value::as_array)
                    .is_some_and(|items| items.len() as f64 == size);
                matched
            }
            "$elemMatch" => {
                let query = argument
                    .as_object()
                    .ok_or_else(|| CoreError::validation("$elemMatch expects a query object"))?;
                let mut found = false;
                if let Some(items) = value.and_then(Value::as_array) {
                    for item in items {
                        if let Some(inner) = item.as_object() {
                            if matches(inner, query)? {
                                found = true;
                                break;
                            }
                        }
                    }
                }
                found
            }
            other => {
                return Err(CoreError::validation(format!("unknown comparison operator {other}")))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(operator: &str, value: Option<&Value>, argument: &Value) -> CoreResult<bool> {
    let candidates = argument
        .as_array()
        .ok_or_else(|| CoreError::validation(format!("{operator} expects an array")))?;
    Ok(candidates.iter().any(|c| equal(value, c)))
}
