//! In-Memory Time-Series Source
//!
//! Test double for [`TimeSeriesSource`] holding observations in a `Vec`
//! kept ordered by time.

use std::collections::BTreeMap;

use crate::application::ports::{SourceError, TimeSeriesSource};
use crate::domain::clock::{DomainTime, TimeFactor};
use crate::domain::series::{Filter, Record, SeriesKey, TimeRange};

#[derive(Debug, Clone)]
struct Observation {
    key: SeriesKey,
    time: DomainTime,
    attributes: BTreeMap<String, f64>,
}

/// In-memory source for testing.
#[derive(Debug, Default)]
pub struct InMemorySource {
    observations: Vec<Observation>,
    constants: Vec<Record>,
    closed: bool,
}

impl InMemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation at a domain time, after any at the same time.
    #[must_use]
    pub fn with(
        mut self,
        key: impl Into<SeriesKey>,
        time: DomainTime,
        attributes: impl IntoIterator<Item = (&'static str, f64)>,
    ) -> Self {
        let at = self.observations.partition_point(|o| o.time <= time);
        self.observations.insert(at, Observation {
            key: key.into(),
            time,
            attributes: attributes
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        });
        self
    }

    /// Add a constant record.
    #[must_use]
    pub fn with_constant(mut self, record: Record) -> Self {
        self.constants.push(record);
        self
    }

    /// Whether `close` has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        Ok(())
    }

    fn passing<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Observation> + 'a {
        self.observations.iter().filter(|o| filter.passes(&o.key))
    }
}

impl TimeSeriesSource for InMemorySource {
    fn first_timestamp(&self, filter: &Filter) -> Result<Option<DomainTime>, SourceError> {
        self.ensure_open()?;
        Ok(self.passing(filter).map(|o| o.time).min())
    }

    fn last_timestamp(&self, filter: &Filter) -> Result<Option<DomainTime>, SourceError> {
        self.ensure_open()?;
        Ok(self.passing(filter).map(|o| o.time).max())
    }

    fn read_range(
        &self,
        range: TimeRange,
        time_factor: TimeFactor,
        filter: &Filter,
    ) -> Result<Vec<Record>, SourceError> {
        self.ensure_open()?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .passing(filter)
            .filter_map(|o| {
                let tick = time_factor.to_tick(o.time);
                range.contains(tick).then(|| Record {
                    key: o.key.clone(),
                    tick,
                    attributes: o.attributes.clone(),
                })
            })
            .collect())
    }

    fn read_constant_data(&self) -> Result<Vec<Record>, SourceError> {
        self.ensure_open()?;
        Ok(self.constants.clone())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn source() -> InMemorySource {
        InMemorySource::new()
            .with("AAPL", 7200, [("open", 3.0)])
            .with("AAPL", 0, [("open", 1.0)])
            .with("MSFT", 3600, [("open", 2.0)])
            .with("AAPL", 10_800, [("open", 4.0)])
    }

    #[test]
    fn bounds_honor_filter() {
        let source = source();
        let only_msft = Filter::including(["MSFT"]);

        assert_eq!(source.first_timestamp(&Filter::default()).unwrap(), Some(0));
        assert_eq!(source.first_timestamp(&only_msft).unwrap(), Some(3600));
        assert_eq!(source.last_timestamp(&only_msft).unwrap(), Some(3600));
        assert_eq!(source.first_timestamp(&Filter::including(["GOOG"])).unwrap(), None);
    }

    #[test]
    fn read_range_is_half_open_in_ticks() {
        let records = source()
            .read_range(TimeRange::new(0, 3), TimeFactor::HOUR, &Filter::default())
            .unwrap();

        let ticks: Vec<_> = records.iter().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![0, 1, 2]);
    }

    #[test]
    fn empty_range_reads_nothing() {
        let records = source()
            .read_range(TimeRange::new(2, 2), TimeFactor::HOUR, &Filter::default())
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn closed_source_fails_reads() {
        let mut source = source();
        source.close();
        source.close();

        assert!(source.is_closed());
        assert_eq!(source.first_timestamp(&Filter::default()), Err(SourceError::Closed));
    }

    proptest! {
        #[test]
        fn read_range_is_non_decreasing(
            times in proptest::collection::vec(0i64..1_000_000, 0..64),
            start in 0i64..300,
            len in 0i64..300,
            factor in 1i64..5000,
        ) {
            let source = times
                .iter()
                .fold(InMemorySource::new(), |s, &t| s.with("K", t, [("v", 1.0)]));
            let factor = TimeFactor::new(factor).unwrap();
            let range = TimeRange::new(start, start + len);

            let records = source.read_range(range, factor, &Filter::default()).unwrap();
            prop_assert!(records.windows(2).all(|w| w[0].tick <= w[1].tick));
            prop_assert!(records.iter().all(|r| range.contains(r.tick)));
        }
    }
}
