//! Time utility functions

use chrono::{DateTime, NaiveDateTime, Utc};

/// Format used for binding timestamps into DuckDB TIMESTAMP columns
pub const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Convert microseconds since Unix epoch to DateTime<Utc>
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_else(|| {
        tracing::warn!(micros, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Render a timestamp the way DuckDB parses TIMESTAMP literals
pub fn to_sql_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(SQL_TIMESTAMP_FORMAT).to_string()
}

/// Parse an RFC 3339 or naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` timestamp (naive = UTC)
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|naive| naive.and_utc())
}
