//! Cool-down helpers for periodic sync
//!
//! Pure functions so timer logic can be tested without a clock source.

use chrono::{DateTime, TimeDelta, Utc};

/// Whether at least `cooldown_secs` have passed since `last_sync_at`.
///
/// A library that has never synced is always due.
pub fn cooldown_elapsed(last_sync_at: Option<DateTime<Utc>>, cooldown_secs: u64) -> bool {
    cooldown_remaining(last_sync_at, cooldown_secs).is_none()
}

/// Time left before the next pass is due, or `None` if it is due now
pub fn cooldown_remaining(
    last_sync_at: Option<DateTime<Utc>>,
    cooldown_secs: u64,
) -> Option<TimeDelta> {
    let last = last_sync_at?;
    let cooldown = i64::try_from(cooldown_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    let remaining = cooldown.checked_sub(&(Utc::now() - last))?;
    (remaining > TimeDelta::zero()).then_some(remaining)
}
