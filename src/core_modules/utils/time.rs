use chrono::{DateTime, SecondsFormat, Utc};

/// Milliseconds since the Unix epoch, UTC.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// ISO-8601 UTC rendering with a `Z` suffix. `None` when out of chrono's range.
pub fn ms_to_iso(ts_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ts_ms).map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
