//! Document matching and modification.
//!
//! The datastore, indexes and cursors depend only on [`DocumentMatcher`];
//! [`BasicMatcher`] is the default operator vocabulary.

mod modifier;
mod query;

use crate::error::CoreResult;
use emberdb_codec::{compare_optional, Document, Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Predicate, update and ordering functions over documents.
pub trait DocumentMatcher: Send + Sync + fmt::Debug {
    /// Returns whether `doc` satisfies `query`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query.
    fn matches(&self, doc: &Document, query: &Map) -> CoreResult<bool>;

    /// Returns the result of applying `update` to `doc`. `doc` is unchanged.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed update or one that would
    /// change `_id`.
    fn modify(&self, doc: &Document, update: &Map) -> CoreResult<Document>;

    /// Orders two possibly undefined values.
    fn compare(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        compare_optional(a, b)
    }
}

/// Default matcher.
///
/// Queries: plain field equality (an array field matches if any element
/// does), `$eq $ne $lt $lte $gt $gte $in $nin $exists $regex $size
/// $elemMatch`, and the logical `$and $or $not`.
///
/// Updates: whole-document replacement, or the modifiers `$set $unset $inc
/// $push $addToSet $pop $min $max`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMatcher;

impl BasicMatcher {
    /// Creates the matcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DocumentMatcher for BasicMatcher {
    fn matches(&self, doc: &Document, query: &Map) -> CoreResult<bool> {
        query::matches(doc, query)
    }

    fn modify(&self, doc: &Document, update: &Map) -> CoreResult<Document> {
        modifier::modify(doc, update)
    }
}

/// Returns true if `update` is made of modifiers rather than a replacement.
///
/// # Errors
///
/// Returns a validation error if modifiers and plain fields are mixed.
pub fn is_modifier_update(update: &Map) -> CoreResult<bool> {
    modifier::is_modifier_update(update)
}
