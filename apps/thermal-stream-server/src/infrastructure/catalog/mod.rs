//! Data-Set Catalog
//!
//! The replayable data sets served by this process. Each data set is a
//! configuration of the generic SQLite source: which file and table layout
//! it reads, the session defaults its clients start with, and whether its
//! sessions share a broadcaster.
//!
//! # Built-in Data Sets
//!
//! | id                | store         | time factor | on open   | broadcast |
//! |-------------------|---------------|-------------|-----------|-----------|
//! | `thermal_oecd`    | `oecd.db`     | 30 days     | streaming | no        |
//! | `thermal_ftse250` | `ftse250.db`  | 1 day       | paused    | yes       |
//! | `thermal_sp500`   | `sp500.db`    | 1 day       | streaming | no        |

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::SourceError;
use crate::application::services::SessionSettings;
use crate::domain::clock::TimeFactor;
use crate::domain::series::Filter;
use crate::infrastructure::broadcast::Broadcaster;
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::sqlite::{CsvRequest, SqliteSource, SqliteStore, TableLayout};

// =============================================================================
// Errors
// =============================================================================

/// Catalog errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// No data set with this id.
    #[error("unknown data set: {0}")]
    UnknownDataSet(String),

    /// Two definitions share an id.
    #[error("duplicate data set: {0}")]
    DuplicateDataSet(String),

    /// A definition cannot be served.
    #[error("invalid data set {id}: {reason}")]
    InvalidDefinition {
        /// Data-set id.
        id: String,
        /// What is wrong.
        reason: &'static str,
    },
}

// =============================================================================
// Definitions
// =============================================================================

/// Static description of one data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSetDefinition {
    /// Route segment and continuity key.
    pub id: &'static str,
    /// Database file name inside the data directory.
    pub file_name: &'static str,
    /// Table layout.
    pub layout: TableLayout,
    /// Initial time factor.
    pub time_factor: TimeFactor,
    /// Step unit label.
    pub step_unit: &'static str,
    /// Keys excluded unless the client changes the filter.
    pub default_exclude: &'static [&'static str],
    /// Start streaming when a session opens.
    pub stream_on_open: bool,
    /// Sessions share a broadcaster.
    pub broadcast: bool,
}

impl DataSetDefinition {
    /// OECD long- and short-term interest rates, monthly.
    #[must_use]
    pub const fn oecd() -> Self {
        Self {
            id: "thermal_oecd",
            file_name: "oecd.db",
            layout: TableLayout::oecd(),
            time_factor: TimeFactor::MONTH,
            step_unit: "month",
            default_exclude: &[],
            stream_on_open: true,
            broadcast: false,
        }
    }

    /// FTSE 250 daily quotes, loaded on demand, with a shared broadcaster.
    #[must_use]
    pub const fn ftse250() -> Self {
        Self {
            id: "thermal_ftse250",
            file_name: "ftse250.db",
            layout: TableLayout::stocks(),
            time_factor: TimeFactor::DAY,
            step_unit: "day",
            default_exclude: &["^FTSE"],
            stream_on_open: false,
            broadcast: true,
        }
    }

    /// S&P 500 daily quotes.
    #[must_use]
    pub const fn sp500() -> Self {
        Self {
            id: "thermal_sp500",
            file_name: "sp500.db",
            layout: TableLayout::stocks(),
            time_factor: TimeFactor::DAY,
            step_unit: "day",
            default_exclude: &[],
            stream_on_open: true,
            broadcast: false,
        }
    }

    /// All built-in definitions.
    #[must_use]
    pub const fn builtin() -> [Self; 3] {
        [Self::oecd(), Self::ftse250(), Self::sp500()]
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason| CatalogError::InvalidDefinition {
            id: self.id.to_string(),
            reason,
        };

        if self.id.is_empty() || !self.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("id must be a non-empty identifier"));
        }
        if self.file_name.is_empty() {
            return Err(invalid("file name is empty"));
        }
        if self.layout.fields.is_empty() {
            return Err(invalid("layout has no fields"));
        }
        if self.layout.csv_columns.is_empty() {
            return Err(invalid("layout has no CSV columns"));
        }
        Ok(())
    }
}

/// Process-wide settings applied to every data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    /// Directory holding the database files.
    pub data_dir: PathBuf,
    /// Busy timeout of store connections.
    pub busy_timeout: Duration,
    /// Wall-clock period between ticks.
    pub tick_interval: Duration,
    /// Records per bulk.
    pub chunk_size: NonZeroUsize,
    /// Broadcast channel capacity.
    pub broadcast_capacity: usize,
}

impl From<&ServerConfig> for CatalogSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            data_dir: config.storage.data_dir.clone(),
            busy_timeout: config.storage.busy_timeout,
            tick_interval: config.playback.tick_interval,
            chunk_size: config.playback.bulk_size,
            broadcast_capacity: config.broadcast.capacity,
        }
    }
}

// =============================================================================
// Data Set
// =============================================================================

/// A servable data set.
#[derive(Debug)]
pub struct DataSet {
    id: String,
    store: SqliteStore,
    settings: SessionSettings,
    broadcaster: Option<Broadcaster>,
}

impl DataSet {
    /// Data-set id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Defaults for new sessions.
    #[must_use]
    pub const fn session_settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Shared broadcaster, when the data set opts in.
    #[must_use]
    pub const fn broadcaster(&self) -> Option<&Broadcaster> {
        self.broadcaster.as_ref()
    }

    /// Open a source for one session.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the store cannot be opened.
    pub fn open_source(&self) -> Result<SqliteSource, SourceError> {
        self.store.open_source()
    }

    /// Export one series as CSV.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the store cannot be read.
    pub fn export_csv(&self, request: &CsvRequest) -> Result<String, SourceError> {
        self.store.export_csv(request)
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Data sets keyed by id.
#[derive(Debug, Default)]
pub struct DataSetCatalog {
    data_sets: BTreeMap<String, Arc<DataSet>>,
}

impl DataSetCatalog {
    /// Catalog of the built-in data sets.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if a built-in definition is invalid.
    pub fn builtin(settings: &CatalogSettings) -> Result<Self, CatalogError> {
        Self::from_definitions(DataSetDefinition::builtin(), settings)
    }

    /// Catalog of arbitrary definitions.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` for an invalid or duplicate definition.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = DataSetDefinition>,
        settings: &CatalogSettings,
    ) -> Result<Self, CatalogError> {
        let mut data_sets = BTreeMap::new();

        for definition in definitions {
            definition.validate()?;
            let id = definition.id.to_string();
            if data_sets.contains_key(&id) {
                return Err(CatalogError::DuplicateDataSet(id));
            }

            let data_set = build(definition, settings);
            if !data_set.store.is_available() {
                tracing::warn!(
                    data_set = %id,
                    path = %data_set.store.path().display(),
                    "Store file not found; sessions will fail until it exists"
                );
            }
            data_sets.insert(id, Arc::new(data_set));
        }

        Ok(Self { data_sets })
    }

    /// Look up a data set.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<DataSet>> {
        self.data_sets.get(id).cloned()
    }

    /// Look up a data set or fail.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::UnknownDataSet` for an unknown id.
    pub fn require(&self, id: &str) -> Result<Arc<DataSet>, CatalogError> {
        self.get(id)
            .ok_or_else(|| CatalogError::UnknownDataSet(id.to_string()))
    }

    /// All data sets in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataSet>> {
        self.data_sets.values()
    }

    /// Number of data sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data_sets.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_sets.is_empty()
    }
}

fn build(definition: DataSetDefinition, settings: &CatalogSettings) -> DataSet {
    let path: PathBuf = Path::new(&settings.data_dir).join(definition.file_name);
    let session = SessionSettings {
        default_filter: Filter::excluding(definition.default_exclude.iter().copied()),
        stream_on_open: definition.stream_on_open,
        tick_interval: settings.tick_interval,
        chunk_size: settings.chunk_size,
        ..SessionSettings::new(definition.id, definition.time_factor, definition.step_unit)
    };

    DataSet {
        id: definition.id.to_string(),
        store: SqliteStore::new(path, definition.layout, settings.busy_timeout),
        broadcaster: definition
            .broadcast
            .then(|| Broadcaster::new(definition.id, settings.broadcast_capacity)),
        settings: session,
    }
}

// =============================================================================
// Tests
// =============================================================================
