//! Timestamp utilities
//!
//! Timestamps are persisted as RFC 3339 text so rows stay readable with
//! the sqlite3 shell.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Format a timestamp for storage
///
/// Fixed width (microseconds, `Z` suffix) so stored values order correctly
/// under plain text comparison.
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| from_db(column, &v)).transpose()
}
