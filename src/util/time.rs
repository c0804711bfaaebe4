//! Time utilities for message stamping

use chrono::{DateTime, Utc};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Convert a wire timestamp (epoch millis) to a UTC datetime
pub fn to_datetime(millis: u64) -> Option<DateTime<Utc>> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
