//! SQLite Store Adapters
//!
//! Read-only access to the on-disk SQLite databases that hold the
//! replayable series.
//!
//! # Components
//!
//! - [`TableLayout`]: columns and timestamp format of a table
//! - [`SqliteSource`]: per-session [`TimeSeriesSource`](crate::application::ports::TimeSeriesSource)
//! - [`export_csv`]: CSV rendering of one series
//! - [`SqliteStore`]: a database file plus its layout, opening the above

mod export;
mod layout;
mod source;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use export::{CsvRequest, InvalidSortOrder, SortOrder, export_csv};
pub use layout::{TableLayout, TimestampFormat};
pub use source::SqliteSource;

use crate::application::ports::SourceError;

/// Default busy timeout for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A SQLite database file with a known table layout.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    layout: Arc<TableLayout>,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Describe a store. Nothing is opened yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, layout: TableLayout, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            layout: Arc::new(layout),
            busy_timeout,
        }
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Table layout.
    #[must_use]
    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Whether the database file exists.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.path.is_file()
    }

    /// Open a source with its own connection.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the file cannot be opened.
    pub fn open_source(&self) -> Result<SqliteSource, SourceError> {
        SqliteSource::open(&self.path, Arc::clone(&self.layout), self.busy_timeout)
    }

    /// Export one series as CSV over a short-lived connection.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the file cannot be opened or queried.
    pub fn export_csv(&self, request: &CsvRequest) -> Result<String, SourceError> {
        let conn = source::open_read_only(&self.path, self.busy_timeout)?;
        export::export_csv(&conn, &self.layout, request)
    }
}
