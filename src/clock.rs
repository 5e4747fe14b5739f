//! Wall-clock helpers.
//!
//! Dates are stored as ISO-8601 UTC strings with millisecond precision and
//! a trailing `Z`, which makes them lexicographically orderable. Internal
//! times are milliseconds since the Unix epoch.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current time as an ISO-8601 UTC string.
pub fn now_iso() -> String {
    iso_date(now_ms())
}

/// Format epoch milliseconds as ISO-8601 UTC, e.g. `2026-08-01T12:00:00.000Z`.
pub fn iso_date(ms: u64) -> String {
    match Utc.timestamp_millis_opt(ms as i64).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => "1970-01-01T00:00:00.000Z".to_string(),
    }
}

/// Parse an ISO-8601 string back to epoch milliseconds.
pub fn parse_iso(text: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_roundtrip_millisecond_precision() {
        let ms = 1_706_745_600_123;
        let iso = iso_date(ms);
        assert!(iso.ends_with('Z'));
        assert_eq!(parse_iso(&iso), Some(ms));
    }

    #[test]
    fn iso_is_lexicographically_ordered() {
        let earlier = iso_date(1_000_000_000_000);
        let later = iso_date(1_000_000_000_001);
        assert!(earlier < later);
    }

    #[test]
    fn now_is_sane() {
        // After 2020-01-01 and formats with a Z suffix.
        assert!(now_ms() > 1_577_836_800_000);
        assert!(now_iso().ends_with('Z'));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_iso("not-a-date"), None);
    }
}
