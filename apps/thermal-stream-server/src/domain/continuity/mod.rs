//! Reconnect Continuity
//!
//! Process-wide record of where the last closed session of each data set
//! left off, so that a new session resumes as if playback had kept running
//! during the gap.
//!
//! # Design
//!
//! The registry holds one [`ReconnectContinuity`] per data set. It is
//! created empty at process start, overwritten by every session close and
//! read once when a session opens. Nothing is persisted across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::clock::{Tick, TimeFactor};

// =============================================================================
// Types
// =============================================================================

/// Data-set identifier (e.g. `thermal_oecd`).
pub type DataSetId = String;

/// State captured when a session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuitySnapshot {
    /// Tick the session had reached.
    pub last_tick: Tick,
    /// Time factor in force at close.
    pub last_time_factor: TimeFactor,
    /// Wall-clock close instant.
    pub closed_at: DateTime<Utc>,
}

impl ContinuitySnapshot {
    /// Tick a session opening at `now` should start from.
    ///
    /// Advances `last_tick` by the whole ticks that elapsed since the close.
    #[must_use]
    pub fn resume_tick(&self, now: DateTime<Utc>) -> Tick {
        let elapsed = (now - self.closed_at).num_seconds();
        self.last_tick
            .saturating_add(self.last_time_factor.ticks_in(elapsed))
    }
}

// =============================================================================
// Per Data-Set Record
// =============================================================================

/// Last-closed-session snapshot for one data set.
#[derive(Debug, Default)]
pub struct ReconnectContinuity {
    snapshot: RwLock<Option<ContinuitySnapshot>>,
    writes: AtomicU64,
}

impl ReconnectContinuity {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent snapshot, if any session has closed.
    #[must_use]
    pub fn snapshot(&self) -> Option<ContinuitySnapshot> {
        *self.snapshot.read()
    }

    /// Overwrite the snapshot.
    pub fn record(&self, snapshot: ContinuitySnapshot) {
        *self.snapshot.write() = Some(snapshot);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of snapshots written since process start.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Continuity records keyed by data-set id.
///
/// Injected into every session; records are created lazily on first use.
#[derive(Debug, Default)]
pub struct ContinuityRegistry {
    records: RwLock<HashMap<DataSetId, Arc<ReconnectContinuity>>>,
}

impl ContinuityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the record for a data set.
    pub fn for_data_set(&self, data_set: &str) -> Arc<ReconnectContinuity> {
        if let Some(record) = self.records.read().get(data_set) {
            return Arc::clone(record);
        }

        let mut records = self.records.write();
        Arc::clone(records.entry(data_set.to_string()).or_default())
    }

    /// Current snapshot of every data set that has one.
    #[must_use]
    pub fn snapshots(&self) -> HashMap<DataSetId, ContinuitySnapshot> {
        self.records
            .read()
            .iter()
            .filter_map(|(id, record)| record.snapshot().map(|s| (id.clone(), s)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
