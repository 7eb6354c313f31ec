//! Clock helpers
//!
//! All timestamps in the pipeline are Unix nanoseconds (`i64`).

use chrono::Utc;

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Current wall-clock time in Unix nanoseconds.
pub fn now_nanos() -> i64 {
    // Out of range only after the year 2262.
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Convert a millisecond count to nanoseconds, saturating.
pub fn millis_to_nanos(millis: u64) -> i64 {
    i64::try_from(millis)
        .unwrap_or(i64::MAX)
        .saturating_mul(NANOS_PER_MILLI)
}

/// Elapsed milliseconds between two nanosecond timestamps, floored at zero.
pub fn elapsed_millis(from: i64, to: i64) -> f64 {
    (to.saturating_sub(from)).max(0) as f64 / NANOS_PER_MILLI as f64
}
