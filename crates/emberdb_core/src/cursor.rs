//! Lazy query execution.

use crate::datastore::Datastore;
use crate::error::{CoreError, CoreResult};
use crate::persistence::ID_FIELD;
use emberdb_codec::{get_path, set_path, unset_path, Document, Map, Value};
use std::cmp::Ordering;

/// Direction of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl SortOrder {
    /// Maps `1` to ascending and `-1` to descending.
    #[must_use]
    pub fn from_direction(direction: i32) -> Option<Self> {
        match direction {
            1 => Some(Self::Ascending),
            -1 => Some(Self::Descending),
            _ => None,
        }
    }
}

/// A query with its sort, skip, limit and projection.
///
/// Nothing is read until [`exec`](Self::exec) or [`count`](Self::count).
/// Without a sort, skip and limit are applied while scanning; with one, the
/// full match set is sorted first.
#[derive(Debug)]
#[must_use]
pub struct Cursor<'a> {
    store: &'a Datastore,
    query: Map,
    sort: Vec<(String, SortOrder)>,
    skip: usize,
    limit: Option<usize>,
    projection: Option<Map>,
}

/// Resolved projection.
#[derive(Debug, PartialEq)]
enum Projection {
    Include { fields: Vec<String>, keep_id: bool },
    Exclude { fields: Vec<String>, keep_id: bool },
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        _ => true,
    }
}

impl Projection {
    fn parse(projection: &Map) -> CoreResult<Option<Self>> {
        if projection.is_empty() {
            return Ok(None);
        }
        let keep_id = projection.get(ID_FIELD).map_or(true, truthy);
        let mut include = None;
        let mut fields = Vec::new();
        for (field, flag) in projection {
            if field == ID_FIELD {
                continue;
            }
            let wanted = truthy(flag);
            if include.is_some_and(|mode| mode != wanted) {
                return Err(CoreError::validation(
                    "a projection cannot both keep and omit fields except for _id",
                ));
            }
            include = Some(wanted);
            fields.push(field.clone());
        }
        Ok(Some(match include {
            Some(true) => Self::Include { fields, keep_id },
            _ => Self::Exclude { fields, keep_id },
        }))
    }

    fn apply(&self, doc: &Document) -> CoreResult<Document> {
        let (mut projected, keep_id) = match self {
            Self::Include { fields, keep_id } => {
                let mut projected = Document::new();
                for field in fields {
                    if let Some(value) = get_path(doc, field) {
                        set_path(&mut projected, field, value)?;
                    }
                }
                (projected, *keep_id)
            }
            Self::Exclude { fields, keep_id } => {
                let mut projected = doc.clone();
                for field in fields {
                    unset_path(&mut projected, field);
                }
                (projected, *keep_id)
            }
        };
        match doc.get(ID_FIELD) {
            Some(id) if keep_id => {
                projected.insert(ID_FIELD.to_string(), id.clone());
            }
            _ => {
                projected.remove(ID_FIELD);
            }
        }
        Ok(projected)
    }
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(store: &'a Datastore, query: Map) -> Self {
        Self {
            store,
            query,
            sort: Vec::new(),
            skip: 0,
            limit: None,
            projection: None,
        }
    }

    /// Adds a sort key. Earlier keys take precedence.
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Skips the first `n` results.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Returns at most `n` results.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Keeps (`1`) or omits (`0`) fields of each result. `_id` is kept
    /// unless set to `0`.
    pub fn projection(mut self, projection: Map) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Runs the query and returns copies of the selected documents.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query or projection.
    pub fn exec(self) -> CoreResult<Vec<Document>> {
        let projection = match &self.projection {
            Some(projection) => Projection::parse(projection)?,
            None => None,
        };
        let selected = self.select()?;
        match projection {
            Some(projection) => selected.iter().map(|doc| projection.apply(doc)).collect(),
            None => Ok(selected),
        }
    }

    /// Counts the documents `exec` would return.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query.
    pub fn count(self) -> CoreResult<usize> {
        Ok(self.select()?.len())
    }

    fn select(&self) -> CoreResult<Vec<Document>> {
        let shared = self.store.shared();
        let matcher = shared.matcher();
        shared.run(|state, ctx| {
            let candidates = state.get_candidates(ctx, &self.query, false)?;
            let limit = self.limit.unwrap_or(usize::MAX);

            if self.sort.is_empty() {
                let mut skipped = 0;
                let mut selected = Vec::new();
                for handle in candidates {
                    if selected.len() >= limit {
                        break;
                    }
                    let Some(doc) = state.document(handle) else {
                        continue;
                    };
                    if !matcher.matches(doc, &self.query)? {
                        continue;
                    }
                    if skipped < self.skip {
                        skipped += 1;
                        continue;
                    }
                    selected.push(doc.clone());
                }
                return Ok(selected);
            }

            let mut keyed = Vec::new();
            for handle in candidates {
                let Some(doc) = state.document(handle) else {
                    continue;
                };
                if matcher.matches(doc, &self.query)? {
                    let keys: Vec<Option<Value>> = self
                        .sort
                        .iter()
                        .map(|(field, _)| get_path(doc, field))
                        .collect();
                    keyed.push((keys, doc));
                }
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), (_, order)) in a.iter().zip(b).zip(&self.sort) {
                    let ordering = matcher.compare(x.as_ref(), y.as_ref());
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            Ok(keyed
                .into_iter()
                .skip(self.skip)
                .take(limit)
                .map(|(_, doc)| doc.clone())
                .collect())
        })
    }
}
