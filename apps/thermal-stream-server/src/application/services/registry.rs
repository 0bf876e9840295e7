//! Active Session Registry
//!
//! Tracks which playback sessions are open, per data set. Sessions hold a
//! [`SessionLease`] for their lifetime; dropping the lease deregisters them,
//! so a connection task that exits by any path is accounted for.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::continuity::DataSetId;

/// Registration details of one open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Data set the session replays.
    pub data_set: DataSetId,
    /// When the session registered.
    pub opened_at: DateTime<Utc>,
}

/// Registry of open sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session until the returned lease is dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>, id: Uuid, data_set: &str) -> SessionLease {
        let entry = SessionEntry {
            data_set: data_set.to_string(),
            opened_at: Utc::now(),
        };
        self.sessions.write().insert(id, entry);
        tracing::debug!(session_id = %id, data_set, "Session registered");

        SessionLease {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of open sessions.
    #[must_use]
    pub fn total(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of open sessions of one data set.
    #[must_use]
    pub fn count(&self, data_set: &str) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|entry| entry.data_set == data_set)
            .count()
    }

    /// Open session counts keyed by data set.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<DataSetId, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.sessions.read().values() {
            *counts.entry(entry.data_set.clone()).or_default() += 1;
        }
        counts
    }

    fn deregister(&self, id: Uuid) -> Option<SessionEntry> {
        self.sessions.write().remove(&id)
    }
}

/// Registration of one session; dropping it deregisters the session.
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    id: Uuid,
}

impl SessionLease {
    /// Session id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(entry) = self.registry.deregister(self.id) {
            let open_for = Utc::now() - entry.opened_at;
            tracing::debug!(
                session_id = %self.id,
                data_set = %entry.data_set,
                open_secs = open_for.num_seconds(),
                "Session deregistered"
            );
        }
    }
}
