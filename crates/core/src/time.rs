//! Timestamp handling for metric events.

use chrono::DateTime;

/// Parse an RFC3339 timestamp into unix seconds.
pub fn parse_rfc3339_unix(s: &str) -> Result<i64, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.timestamp())
}
