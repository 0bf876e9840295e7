//! Time-Series Types
//!
//! Core domain types for replayed observations: records, tick ranges and
//! the include/exclude key filter a session applies to its series.

use std::collections::BTreeMap;

use crate::domain::clock::Tick;

/// A series identifier (stock ticker, country code, station id).
pub type SeriesKey = String;

// =============================================================================
// Record
// =============================================================================

/// One time-series observation.
///
/// Missing values are omitted from `attributes` rather than stored as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Series identifier.
    pub key: SeriesKey,
    /// Tick in the session's compressed time unit.
    pub tick: Tick,
    /// Field name to numeric value.
    pub attributes: BTreeMap<String, f64>,
}

impl Record {
    /// Create a record with no attributes.
    #[must_use]
    pub fn new(key: impl Into<SeriesKey>, tick: Tick) -> Self {
        Self {
            key: key.into(),
            tick,
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute, skipping it when the value is missing or not finite.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.attributes.insert(name.into(), value);
        }
        self
    }
}

// =============================================================================
// Time Range
// =============================================================================

/// Half-open `[start, end)` range of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// First tick included.
    pub start: Tick,
    /// First tick excluded.
    pub end: Tick,
}

impl TimeRange {
    /// Create a range.
    #[must_use]
    pub const fn new(start: Tick, end: Tick) -> Self {
        Self { start, end }
    }

    /// Whether the range contains no ticks.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `tick` lies inside the range.
    #[must_use]
    pub const fn contains(&self, tick: Tick) -> bool {
        self.start <= tick && tick < self.end
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Include/exclude key sets restricting which series a session receives.
///
/// A non-empty include list admits only those keys; the exclude list is
/// applied afterwards and always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    include: Vec<SeriesKey>,
    exclude: Vec<SeriesKey>,
}

impl Filter {
    /// Create a filter from include and exclude lists.
    #[must_use]
    pub const fn new(include: Vec<SeriesKey>, exclude: Vec<SeriesKey>) -> Self {
        Self { include, exclude }
    }

    /// A filter that only excludes.
    #[must_use]
    pub fn excluding(keys: impl IntoIterator<Item = impl Into<SeriesKey>>) -> Self {
        Self::new(Vec::new(), keys.into_iter().map(Into::into).collect())
    }

    /// A filter that only includes.
    #[must_use]
    pub fn including(keys: impl IntoIterator<Item = impl Into<SeriesKey>>) -> Self {
        Self::new(keys.into_iter().map(Into::into).collect(), Vec::new())
    }

    /// Keys admitted when non-empty.
    #[must_use]
    pub fn include(&self) -> &[SeriesKey] {
        &self.include
    }

    /// Keys always dropped.
    #[must_use]
    pub fn exclude(&self) -> &[SeriesKey] {
        &self.exclude
    }

    /// Whether `key` passes the filter.
    #[must_use]
    pub fn passes(&self, key: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|k| k == key);
        included && !self.exclude.iter().any(|k| k == key)
    }
}

// =============================================================================
// Tests
// =============================================================================
