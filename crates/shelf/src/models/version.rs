//! Record versions and their wire encoding
//!
//! Every replica versions a record by its last-mutation timestamp. On the
//! wire both transports carry that timestamp as integer milliseconds since
//! the Unix epoch, so anything finer than a millisecond is noise.

use chrono::{DateTime, TimeDelta, Utc};

/// Versions closer together than this are treated as the same version.
pub const VERSION_EPSILON: TimeDelta = TimeDelta::milliseconds(1);

/// Whether two versions are equal within [`VERSION_EPSILON`]
pub fn versions_match(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).abs() < VERSION_EPSILON
}

/// Encode a version for the wire (milliseconds since epoch)
pub fn to_millis(version: DateTime<Utc>) -> i64 {
    version.timestamp_millis()
}

/// Decode a wire version; `None` if the value is out of range
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Current time truncated to wire precision
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    from_millis(to_millis(now)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_match_within_epsilon() {
        let base = from_millis(1_700_000_000_000).unwrap();
        assert!(versions_match(base, base));
        assert!(versions_match(base, base + TimeDelta::microseconds(900)));
        assert!(versions_match(base + TimeDelta::microseconds(900), base));
        assert!(!versions_match(base, base + TimeDelta::milliseconds(1)));
        assert!(!versions_match(base, base - TimeDelta::milliseconds(5)));
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        let now = now_millis();
        assert_eq!(from_millis(to_millis(now)), Some(now));
    }

    #[test]
    fn test_from_millis_out_of_range() {
        assert!(from_millis(i64::MAX).is_none());
    }
}
