//! Time and timestamp helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// UTC timestamp used for `last_changed`, image capture times, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Saturating millisecond count of a duration, for logs and error payloads.
#[must_use]
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        assert!(ts >= before);
    }

    #[test]
    fn should_count_whole_milliseconds() {
        assert_eq!(as_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(as_millis(Duration::from_micros(2_500)), 2);
    }
}
