//! Funding schedule helpers.

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Hours between funding settlements.
pub const FUNDING_INTERVAL_HOURS: i64 = 8;

/// Next 00:00 / 08:00 / 16:00 UTC boundary strictly after `now`.
pub fn next_funding_settlement(now: DateTime<Utc>) -> DateTime<Utc> {
    let interval = Duration::hours(FUNDING_INTERVAL_HOURS);
    let floor = now.duration_trunc(interval).unwrap_or(now);
    floor + interval
}

/// Whole minutes from `now` until `at`, zero if already past.
pub fn minutes_until(now: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (at - now).num_minutes().max(0)
}
