//! CSV Export
//!
//! Renders one series of a store as CSV for a half-open date range. The
//! header line lists the layout's CSV headers; each row holds the stored
//! values in plain string form, with an empty field for missing values.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;

use crate::application::ports::SourceError;
use crate::infrastructure::sqlite::layout::{TableLayout, quoted};

/// Row order of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Asc,
    /// Newest first.
    Desc,
}

impl SortOrder {
    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Unrecognised sort order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sort order {0:?}, expected asc or desc")]
pub struct InvalidSortOrder(pub String);

impl FromStr for SortOrder {
    type Err = InvalidSortOrder;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(InvalidSortOrder(other.to_string())),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

/// Export date bound that is not a `YYYY-MM-DD` calendar date.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date {0:?}, expected YYYY-MM-DD")]
pub struct InvalidDate(pub String);

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(raw: &str) -> Result<NaiveDate, InvalidDate> {
    // chrono accepts unpadded fields, the route does not.
    if raw.len() != 10 {
        return Err(InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| InvalidDate(raw.to_string()))
}

/// One export request over the half-open date range `[start, end)`.
///
/// Bounds are compared against the stored text, so a monthly store's
/// `YYYY-MM` row for the start month sorts before `start` and is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRequest {
    /// Series key.
    pub key: String,
    /// Inclusive start date.
    pub start: NaiveDate,
    /// Exclusive end date.
    pub end: NaiveDate,
    /// Row order.
    pub order: SortOrder,
}

impl CsvRequest {
    /// Build a request from raw route segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDate` if either bound is not a `YYYY-MM-DD` date.
    pub fn parse(
        key: impl Into<String>,
        start: &str,
        end: &str,
        order: SortOrder,
    ) -> Result<Self, InvalidDate> {
        Ok(Self {
            key: key.into(),
            start: parse_date(start)?,
            end: parse_date(end)?,
            order,
        })
    }
}

/// Run an export against an open connection.
///
/// # Errors
///
/// Returns `SourceError` if the query or CSV encoding fails.
pub fn export_csv(
    conn: &Connection,
    layout: &TableLayout,
    request: &CsvRequest,
) -> Result<String, SourceError> {
    let columns = layout
        .csv_columns
        .iter()
        .map(|(column, _)| quoted(column))
        .collect::<Vec<_>>()
        .join(", ");
    let time = quoted(layout.time_column);
    let sql = format!(
        "SELECT {columns} FROM {table} \
         WHERE {time} >= ?1 AND {time} < ?2 AND {key} = ?3 \
         ORDER BY {time} {order}",
        table = quoted(layout.table),
        key = quoted(layout.key_column),
        order = request.order.sql(),
    );

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(layout.csv_headers()).map_err(csv_error)?;

    let mut stmt = conn.prepare(&sql)?;
    let start = request.start.format(DATE_FORMAT).to_string();
    let end = request.end.format(DATE_FORMAT).to_string();
    let mut rows = stmt.query([&start, &end, &request.key])?;
    let width = layout.csv_columns.len();
    while let Some(row) = rows.next()? {
        let fields = (0..width)
            .map(|i| row.get::<_, SqlValue>(i).map(plain_string))
            .collect::<Result<Vec<_>, _>>()?;
        writer.write_record(&fields).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| SourceError::Query(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SourceError::Query(e.to_string()))
}

fn csv_error(error: csv::Error) -> SourceError {
    SourceError::Query(format!("CSV encoding failed: {error}"))
}

/// Integral reals keep one decimal place (`3.0`), other values print as-is.
fn plain_string(value: SqlValue) -> String {
    match value {
        SqlValue::Null | SqlValue::Blob(_) => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 => format!("{f:.1}"),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => s,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn oecd() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE oecd (key TEXT, ts TEXT, lt_interest_rate REAL, st_interest_rate REAL);
             INSERT INTO oecd VALUES ('DEU', '2000-01', 5.5, 3.0);
             INSERT INTO oecd VALUES ('DEU', '2000-02', NULL, 3.25);
             INSERT INTO oecd VALUES ('FRA', '2000-02', 5.0, 3.1);
             INSERT INTO oecd VALUES ('DEU', '2000-03', 5.4, 3.5);",
        )
        .unwrap();
        conn
    }

    fn request(order: SortOrder) -> CsvRequest {
        CsvRequest::parse("DEU", "2000-01-01", "2000-03-01", order).unwrap()
    }

    #[test]
    fn export_ascending_with_missing_values() {
        let csv = export_csv(&oecd(), &TableLayout::oecd(), &request(SortOrder::Asc)).unwrap();
        assert_eq!(
            csv,
            "date,lt_interest_rate,st_interest_rate\n2000-02,,3.25\n2000-03,5.4,3.5\n"
        );
    }

    #[test]
    fn export_descending() {
        let csv = export_csv(&oecd(), &TableLayout::oecd(), &request(SortOrder::Desc)).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[1], "2000-03,5.4,3.5");
        assert_eq!(lines[2], "2000-02,,3.25");
    }

    #[test]
    fn export_of_unknown_key_has_only_header() {
        let mut req = request(SortOrder::Asc);
        req.key = "XYZ".to_string();
        let csv = export_csv(&oecd(), &TableLayout::oecd(), &req).unwrap();
        assert_eq!(csv, "date,lt_interest_rate,st_interest_rate\n");
    }

    #[test_case("asc", Some(SortOrder::Asc) ; "asc")]
    #[test_case("desc", Some(SortOrder::Desc) ; "desc")]
    #[test_case("DESC", None ; "case sensitive")]
    #[test_case("random", None ; "invalid")]
    fn parses_sort_order(raw: &str, expected: Option<SortOrder>) {
        assert_eq!(raw.parse::<SortOrder>().ok(), expected);
    }

    #[test_case("2020-01-02", true ; "date")]
    #[test_case("2020-02-29", true ; "leap day")]
    #[test_case("2021-02-29", false ; "not a leap year")]
    #[test_case("2020-99", false ; "month overflow")]
    #[test_case("2020", false ; "year only")]
    #[test_case("2020-1-2", false ; "unpadded")]
    #[test_case("2020-01-02T00:00", false ; "with time")]
    #[test_case("", false ; "empty")]
    fn parses_export_dates(raw: &str, valid: bool) {
        let request = CsvRequest::parse("VOD.L", raw, "2030-01-01", SortOrder::Asc);
        assert_eq!(request.is_ok(), valid);
        if !valid {
            assert_eq!(request.unwrap_err(), InvalidDate(raw.to_string()));
        }
    }

    #[test_case(SqlValue::Real(3.0), "3.0" ; "integral real")]
    #[test_case(SqlValue::Real(3.25), "3.25" ; "fractional real")]
    #[test_case(SqlValue::Integer(120), "120" ; "integer")]
    #[test_case(SqlValue::Null, "" ; "null")]
    #[test_case(SqlValue::Text("2000-01".into()), "2000-01" ; "text")]
    fn plain_string_forms(value: SqlValue, expected: &str) {
        assert_eq!(plain_string(value), expected);
    }
}
