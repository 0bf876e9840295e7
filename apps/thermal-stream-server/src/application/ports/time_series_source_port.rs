//! Time-Series Source Port (Driven Port)
//!
//! Narrow read interface over a backing store. Each session owns one source
//! for its whole life; calls share no cursor state.

use crate::domain::clock::{DomainTime, TimeFactor};
use crate::domain::series::{Filter, Record, TimeRange};

/// Time-series source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The store could not be opened or reached.
    #[error("time-series store unavailable: {0}")]
    Unavailable(String),

    /// A query against the store failed.
    #[error("time-series query failed: {0}")]
    Query(String),

    /// A stored timestamp did not match the store's format.
    #[error("invalid timestamp {value:?}, expected {format}")]
    InvalidTimestamp {
        /// Raw stored value.
        value: String,
        /// Expected format description.
        format: &'static str,
    },

    /// The source was already closed.
    #[error("time-series source is closed")]
    Closed,
}

/// Read access to a time-series store.
#[cfg_attr(test, mockall::automock)]
pub trait TimeSeriesSource: Send {
    /// Earliest timestamp (domain seconds) across keys passing `filter`.
    ///
    /// `None` when no record passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the store cannot be queried.
    fn first_timestamp(&self, filter: &Filter) -> Result<Option<DomainTime>, SourceError>;

    /// Latest timestamp (domain seconds) across keys passing `filter`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the store cannot be queried.
    fn last_timestamp(&self, filter: &Filter) -> Result<Option<DomainTime>, SourceError>;

    /// Records with tick in `range`, ascending by tick.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the store cannot be queried.
    fn read_range(
        &self,
        range: TimeRange,
        time_factor: TimeFactor,
        filter: &Filter,
    ) -> Result<Vec<Record>, SourceError>;

    /// Tick-0 metadata sent once when a session opens.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the store cannot be queried.
    fn read_constant_data(&self) -> Result<Vec<Record>, SourceError> {
        Ok(Vec::new())
    }

    /// Release the store connection. Idempotent.
    fn close(&mut self) {}
}
