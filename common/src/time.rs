use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Pure components never call this directly; they take `now_ms` as a
/// parameter so tests can drive time explicitly.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub const MS_PER_SEC: u64 = 1_000;
pub const MS_PER_HOUR: u64 = 3_600 * MS_PER_SEC;
