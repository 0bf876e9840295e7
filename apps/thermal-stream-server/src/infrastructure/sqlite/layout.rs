//! Store Layouts
//!
//! Describes how a time-series table is laid out: its key and time
//! columns, how timestamps are stored as text, which numeric fields become
//! record attributes and which columns a CSV export contains.

use chrono::{DateTime, NaiveDate, Utc};

use crate::application::ports::SourceError;
use crate::domain::clock::DomainTime;

// =============================================================================
// Timestamp Format
// =============================================================================

/// Text encoding of stored timestamps. All instants are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `YYYY-MM`, meaning the first day of the month.
    YearMonth,
    /// `YYYY-MM-DD`, meaning midnight.
    Date,
}

impl TimestampFormat {
    /// Human-readable pattern, used in error messages.
    #[must_use]
    pub const fn pattern(self) -> &'static str {
        match self {
            Self::YearMonth => "YYYY-MM",
            Self::Date => "YYYY-MM-DD",
        }
    }

    /// Parse stored text into domain seconds.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::InvalidTimestamp` if the text does not match.
    pub fn parse(self, raw: &str) -> Result<DomainTime, SourceError> {
        let trimmed = raw.trim();
        let date = match self {
            Self::YearMonth => NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d"),
            // Tolerate a trailing time component.
            Self::Date => NaiveDate::parse_from_str(trimmed.get(..10).unwrap_or(trimmed), "%Y-%m-%d"),
        };

        date.ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| SourceError::InvalidTimestamp {
                value: raw.to_string(),
                format: self.pattern(),
            })
    }

    /// Format domain seconds the way the store keeps them.
    ///
    /// Truncates to the format's precision, so the result never sorts after
    /// the stored text of a later instant. `None` outside chrono's range.
    #[must_use]
    pub fn format(self, time: DomainTime) -> Option<String> {
        let instant = DateTime::<Utc>::from_timestamp(time, 0)?;
        Some(match self {
            Self::YearMonth => instant.format("%Y-%m").to_string(),
            Self::Date => instant.format("%Y-%m-%d").to_string(),
        })
    }
}

// =============================================================================
// Table Layout
// =============================================================================

/// Column layout of one time-series table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// Table name.
    pub table: &'static str,
    /// Series key column.
    pub key_column: &'static str,
    /// Timestamp column.
    pub time_column: &'static str,
    /// Timestamp text encoding.
    pub format: TimestampFormat,
    /// Numeric columns exposed as record attributes.
    pub fields: &'static [&'static str],
    /// `(column, header)` pairs of a CSV export, in order.
    pub csv_columns: &'static [(&'static str, &'static str)],
}

impl TableLayout {
    /// Monthly interest rates per country.
    #[must_use]
    pub const fn oecd() -> Self {
        Self {
            table: "oecd",
            key_column: "key",
            time_column: "ts",
            format: TimestampFormat::YearMonth,
            fields: &["lt_interest_rate", "st_interest_rate"],
            csv_columns: &[
                ("ts", "date"),
                ("lt_interest_rate", "lt_interest_rate"),
                ("st_interest_rate", "st_interest_rate"),
            ],
        }
    }

    /// Daily stock quotes per ticker.
    #[must_use]
    pub const fn stocks() -> Self {
        Self {
            table: "stocks",
            key_column: "ticker",
            time_column: "date",
            format: TimestampFormat::Date,
            fields: &["volume", "open", "close", "adj_close", "high", "low", "change"],
            csv_columns: &[
                ("date", "date"),
                ("open", "open"),
                ("high", "high"),
                ("low", "low"),
                ("close", "close"),
                ("volume", "volume"),
                ("adj_close", "adj_close"),
            ],
        }
    }

    /// CSV header names.
    pub fn csv_headers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.csv_columns.iter().map(|(_, header)| *header)
    }
}

/// Quote an SQL identifier.
pub(crate) fn quoted(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

// =============================================================================
// Tests
// =============================================================================
