use chrono::{DateTime, Utc};

/// Current time truncated to millisecond precision, which is the resolution
/// timestamps are stored and serialized at.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    from_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
