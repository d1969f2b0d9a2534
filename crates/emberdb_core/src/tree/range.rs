//! Bounds for range searches.

use std::cmp::Ordering;

/// Lower and upper bounds for [`AvlTree::between_bounds`](super::AvlTree::between_bounds).
///
/// Missing bounds are unbounded. When a strict and an inclusive bound are
/// both given on one side, the more restrictive one applies; on a tie the
/// strict bound wins.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery<K> {
    /// Strict lower bound.
    pub gt: Option<K>,
    /// Inclusive lower bound.
    pub gte: Option<K>,
    /// Strict upper bound.
    pub lt: Option<K>,
    /// Inclusive upper bound.
    pub lte: Option<K>,
}

impl<K> Default for RangeQuery<K> {
    fn default() -> Self {
        Self {
            gt: None,
            gte: None,
            lt: None,
            lte: None,
        }
    }
}

impl<K> RangeQuery<K> {
    /// Creates an unbounded query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strict lower bound.
    #[must_use]
    pub fn gt(mut self, key: K) -> Self {
        self.gt = Some(key);
        self
    }

    /// Sets the inclusive lower bound.
    #[must_use]
    pub fn gte(mut self, key: K) -> Self {
        self.gte = Some(key);
        self
    }

    /// Sets the strict upper bound.
    #[must_use]
    pub fn lt(mut self, key: K) -> Self {
        self.lt = Some(key);
        self
    }

    /// Sets the inclusive upper bound.
    #[must_use]
    pub fn lte(mut self, key: K) -> Self {
        self.lte = Some(key);
        self
    }

    /// Returns true if no bound is set.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }

    /// Effective lower bound as `(key, strict)`.
    pub(crate) fn lower_bound(&self, compare: &dyn Fn(&K, &K) -> Ordering) -> Option<(&K, bool)> {
        match (&self.gt, &self.gte) {
            (Some(gt), Some(gte)) => {
                if compare(gte, gt) == Ordering::Greater {
                    Some((gte, false))
                } else {
                    Some((gt, true))
                }
            }
            (Some(gt), None) => Some((gt, true)),
            (None, Some(gte)) => Some((gte, false)),
            (None, None) => None,
        }
    }

    /// Effective upper bound as `(key, strict)`.
    pub(crate) fn upper_bound(&self, compare: &dyn Fn(&K, &K) -> Ordering) -> Option<(&K, bool)> {
        match (&self.lt, &self.lte) {
            (Some(lt), Some(lte)) => {
                if compare(lte, lt) == Ordering::Less {
                    Some((lte, false))
                } else {
                    Some((lt, true))
                }
            }
            (Some(lt), None) => Some((lt, true)),
            (None, Some(lte)) => Some((lte, false)),
            (None, None) => None,
        }
    }
}
