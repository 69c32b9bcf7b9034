//! Closed time ranges used to drive tree queries.

use crate::error::{HistreeError, Result};
use serde::{Deserialize, Serialize};

/// A closed time range `[min, max]`.
///
/// Every query against the tree is expressed as a range; a point query is
/// the singleton range `[t, t]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    min: i64,
    max: i64,
}

impl TimeRange {
    /// Creates a new range, rejecting `min > max`.
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(HistreeError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Creates the range containing only `t`.
    pub fn singleton(t: i64) -> Self {
        Self { min: t, max: t }
    }

    /// Returns the lower bound.
    #[inline]
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Returns the upper bound.
    #[inline]
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Returns true if `t` lies inside the range.
    #[inline]
    pub fn contains(&self, t: i64) -> bool {
        self.min <= t && t <= self.max
    }

    /// Returns true if `[start, end]` shares at least one instant with the range.
    ///
    /// An inverted `[start, end]` covers nothing and never intersects.
    #[inline]
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        start <= end && start <= self.max && self.min <= end
    }

    /// Returns the part of the range that lies within `[start, end]`.
    pub fn clip(&self, start: i64, end: i64) -> Option<TimeRange> {
        if !self.intersects(start, end) {
            return None;
        }
        Some(Self {
            min: self.min.max(start),
            max: self.max.min(end),
        })
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
