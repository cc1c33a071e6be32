//! Recency filter for push-protocol records
//!
//! Devices flush their stored punches when they reconnect. Only records
//! inside the trailing window of "now", or stamped after this relay
//! instance started, are treated as real-time. Everything else is backlog
//! and is dropped without error.

use chrono::Duration;

use crate::model::Timestamp;

/// Trailing window, in seconds, that counts as real-time
pub const RECENCY_WINDOW_SECS: i64 = 5 * 60;

/// `timestamp >= now - window` or `timestamp >= process_start`
pub fn is_live(timestamp: Timestamp, now: Timestamp, process_start: Timestamp) -> bool {
    is_live_within(timestamp, now, process_start, Duration::seconds(RECENCY_WINDOW_SECS))
}

fn is_live_within(
    timestamp: Timestamp,
    now: Timestamp,
    process_start: Timestamp,
    window: Duration,
) -> bool {
    timestamp >= now - window || timestamp >= process_start
}

/// Recency filter bound to one relay instance's start time
#[derive(Debug, Clone, Copy)]
pub struct RecencyFilter {
    process_start: Timestamp,
    window: Duration,
}

impl RecencyFilter {
    pub fn new(process_start: Timestamp) -> Self {
        Self {
            process_start,
            window: Duration::seconds(RECENCY_WINDOW_SECS),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn process_start(&self) -> Timestamp {
        self.process_start
    }

    pub fn is_live(&self, timestamp: Timestamp, now: Timestamp) -> bool {
        is_live_within(timestamp, now, self.process_start, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_iso8601;

    fn at(s: &str) -> Timestamp {
        parse_iso8601(s).unwrap()
    }

    #[test]
    fn test_just_outside_window_before_start_is_dropped() {
        let now = at("2024-06-01T12:00:00+00:00");
        let start = now;
        let ts = now - Duration::seconds(5 * 60 + 1);
        assert!(!is_live(ts, now, start));
    }

    #[test]
    fn test_inside_window_is_kept() {
        let now = at("2024-06-01T12:00:00+00:00");
        let start = at("2024-06-01T08:00:00+00:00");
        assert!(is_live(now - Duration::minutes(4), now, start));
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let now = at("2024-06-01T12:00:00+00:00");
        let start = now;
        assert!(is_live(now - Duration::minutes(5), now, start));
    }

    #[test]
    fn test_older_than_window_but_after_start_is_kept() {
        let now = at("2024-06-01T12:00:00+00:00");
        let start = at("2024-06-01T11:00:00+00:00");
        let ts = at("2024-06-01T11:30:00+00:00");
        assert!(is_live(ts, now, start));
    }

    #[test]
    fn test_future_timestamp_is_kept() {
        let now = at("2024-06-01T12:00:00+00:00");
        assert!(is_live(now + Duration::hours(1), now, now));
    }

    #[test]
    fn test_offsets_compare_as_instants() {
        let now = at("2024-06-01T12:00:00+00:00");
        let start = now;
        // 14:58 at +03:00 is 11:58 UTC
        assert!(is_live(at("2024-06-01T14:58:00+03:00"), now, start));
        // 14:50 at +03:00 is 11:50 UTC
        assert!(!is_live(at("2024-06-01T14:50:00+03:00"), now, start));
    }

    #[test]
    fn test_filter_uses_injected_start() {
        let start = at("2024-06-01T09:00:00+00:00");
        let filter = RecencyFilter::new(start);
        let now = at("2024-06-01T12:00:00+00:00");
        assert_eq!(filter.process_start(), start);
        assert!(filter.is_live(at("2024-06-01T10:00:00+00:00"), now));
        assert!(!filter.is_live(at("2024-06-01T08:59:59+00:00"), now));
    }

    #[test]
    fn test_custom_window() {
        let now = at("2024-06-01T12:00:00+00:00");
        let filter = RecencyFilter::new(now).with_window(Duration::minutes(30));
        assert!(filter.is_live(now - Duration::minutes(29), now));
        assert!(!filter.is_live(now - Duration::minutes(31), now));
    }
}
