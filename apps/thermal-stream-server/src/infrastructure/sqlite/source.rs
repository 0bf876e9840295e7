//! SQLite Time-Series Source
//!
//! Read-only [`TimeSeriesSource`] over one SQLite table. Each source owns a
//! single connection, opened with a busy timeout so that a writer holding
//! the database lock stalls only the owning session.
//!
//! Range queries compare the stored timestamp text against bounds formatted
//! in the store's own format, then drop rows whose exact tick falls outside
//! the requested range. Filters become `IN` / `NOT IN` clauses with bound
//! parameters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params_from_iter};

use crate::application::ports::{SourceError, TimeSeriesSource};
use crate::domain::clock::{DomainTime, TimeFactor};
use crate::domain::series::{Filter, Record, TimeRange};
use crate::infrastructure::sqlite::layout::{TableLayout, quoted};

impl From<rusqlite::Error> for SourceError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::NotADatabase
                        | rusqlite::ErrorCode::PermissionDenied
                ) =>
            {
                Self::Unavailable(error.to_string())
            }
            _ => Self::Query(error.to_string()),
        }
    }
}

/// Open a read-only connection with a busy timeout.
pub(crate) fn open_read_only(path: &Path, busy_timeout: Duration) -> Result<Connection, SourceError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

// =============================================================================
// Source
// =============================================================================

/// Time-series source backed by one SQLite table.
#[derive(Debug)]
pub struct SqliteSource {
    conn: Option<Connection>,
    layout: Arc<TableLayout>,
    path: PathBuf,
}

impl SqliteSource {
    /// Open the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the file cannot be opened.
    pub fn open(
        path: impl Into<PathBuf>,
        layout: Arc<TableLayout>,
        busy_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        let conn = open_read_only(&path, busy_timeout)?;
        tracing::debug!(path = %path.display(), table = layout.table, "Opened time-series store");

        Ok(Self {
            conn: Some(conn),
            layout,
            path,
        })
    }

    /// Wrap an existing connection.
    #[must_use]
    pub fn from_connection(conn: Connection, layout: Arc<TableLayout>) -> Self {
        Self {
            path: conn.path().map(PathBuf::from).unwrap_or_default(),
            conn: Some(conn),
            layout,
        }
    }

    /// Whether the connection has been released.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn conn(&self) -> Result<&Connection, SourceError> {
        self.conn.as_ref().ok_or(SourceError::Closed)
    }

    fn bound(&self, column: &str, filter: &Filter, aggregate: &str) -> Result<Option<DomainTime>, SourceError> {
        let layout = &self.layout;
        let (clause, params) = filter_clause(layout.key_column, filter);
        let sql = format!(
            "SELECT {aggregate}({time}) FROM {table} WHERE 1=1{clause}",
            time = quoted(column),
            table = quoted(layout.table),
        );

        let raw: Option<String> = self
            .conn()?
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        raw.map(|text| layout.format.parse(&text)).transpose()
    }
}

impl TimeSeriesSource for SqliteSource {
    fn first_timestamp(&self, filter: &Filter) -> Result<Option<DomainTime>, SourceError> {
        self.bound(self.layout.time_column, filter, "MIN")
    }

    fn last_timestamp(&self, filter: &Filter) -> Result<Option<DomainTime>, SourceError> {
        self.bound(self.layout.time_column, filter, "MAX")
    }

    fn read_range(
        &self,
        range: TimeRange,
        time_factor: TimeFactor,
        filter: &Filter,
    ) -> Result<Vec<Record>, SourceError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let layout = &self.layout;
        let format = layout.format;
        let lower = format
            .format(time_factor.to_domain(range.start))
            .unwrap_or_default();
        let upper = format
            .format(time_factor.to_domain(range.end))
            .unwrap_or_else(|| "9999-12-31".to_string());

        let (clause, filter_params) = filter_clause(layout.key_column, filter);
        let fields = layout
            .fields
            .iter()
            .map(|f| quoted(f))
            .collect::<Vec<_>>()
            .join(", ");
        let time = quoted(layout.time_column);
        let sql = format!(
            "SELECT {key}, {time}, {fields} FROM {table} \
             WHERE {time} >= ? AND {time} <= ?{clause} \
             ORDER BY {time} ASC",
            key = quoted(layout.key_column),
            table = quoted(layout.table),
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let params = [lower, upper].into_iter().chain(filter_params);
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let stamp: String = row.get(1)?;
            let tick = time_factor.to_tick(format.parse(&stamp)?);
            if !range.contains(tick) {
                continue;
            }

            let mut record = Record::new(key, tick);
            for (i, field) in layout.fields.iter().enumerate() {
                record = record.with_attribute(*field, numeric(row.get(i + 2)?));
            }
            records.push(record);
        }

        Ok(records)
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err((_, e)) = conn.close()
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to close time-series store");
        }
    }
}

/// `AND key IN (..) AND key NOT IN (..)` with its parameters.
fn filter_clause(key_column: &str, filter: &Filter) -> (String, Vec<String>) {
    let key = quoted(key_column);
    let mut clause = String::new();
    let mut params = Vec::new();

    for (keys, op) in [(filter.include(), "IN"), (filter.exclude(), "NOT IN")] {
        if keys.is_empty() {
            continue;
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        clause.push_str(&format!(" AND {key} {op} ({placeholders})"));
        params.extend(keys.iter().cloned());
    }

    (clause, params)
}

/// Numeric view of a stored value; `NULL`, blobs and non-numeric text are
/// treated as missing.
#[allow(clippy::cast_precision_loss)]
fn numeric(value: SqlValue) -> Option<f64> {
    match value {
        SqlValue::Integer(i) => Some(i as f64),
        SqlValue::Real(f) => Some(f),
        SqlValue::Text(s) => s.trim().parse().ok(),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
