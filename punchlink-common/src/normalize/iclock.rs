//! iClock push-protocol line parser
//!
//! Line format: `USERID \t TIMESTAMP \t STATUS \t VERIFY \t WORKCODE`.
//! Only the first two fields are mandatory; STATUS defaults to `"0"`.

use tracing::warn;

use crate::model::{AttendanceEvent, Direction, SourceProtocol, Timestamp};
use crate::time;

/// Parse one line; `None` for blank or short lines
pub fn from_iclock_line(line: &str, now: Timestamp) -> Option<AttendanceEvent> {
    if line.trim().is_empty() {
        return None;
    }

    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < 2 {
        return None;
    }

    let user_id = fields[0];
    if user_id.is_empty() {
        return None;
    }
    let status = fields.get(2).copied().filter(|s| !s.is_empty()).unwrap_or("0");

    let (timestamp, timestamp_inferred) = match time::parse_with_formats(fields[1], &time::ICLOCK_FORMATS) {
        Some(ts) => (ts, false),
        None => {
            warn!(user_id = %user_id, timestamp = %fields[1], "Could not parse iClock timestamp, using current time");
            (now, true)
        }
    };

    Some(AttendanceEvent {
        user_id: user_id.to_string(),
        display_name: AttendanceEvent::placeholder_name(user_id),
        timestamp,
        direction: Direction::from_text(status),
        source: SourceProtocol::IClockPush,
        timestamp_inferred,
    })
}

/// Parse a full push body (newline separated records)
pub fn from_iclock_body(body: &str, now: Timestamp) -> Vec<AttendanceEvent> {
    body.lines()
        .filter_map(|line| from_iclock_line(line, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        time::parse_iso8601("2024-05-01T12:00:00+00:00").unwrap()
    }

    #[test]
    fn test_full_line() {
        let event = from_iclock_line("7\t2024-01-01 00:00:00\t0\t1\t0", now()).unwrap();
        assert_eq!(event.user_id, "7");
        assert_eq!(event.display_name, "User 7");
        assert_eq!(event.direction, Direction::CheckIn);
        assert_eq!(event.source, SourceProtocol::IClockPush);
        assert!(!event.timestamp_inferred);
        assert_eq!(
            event.timestamp,
            time::parse_with_formats("2024-01-01 00:00:00", &time::ICLOCK_FORMATS).unwrap()
        );
    }

    #[test]
    fn test_two_field_line_defaults_status() {
        let event = from_iclock_line("12\t2024/01/01 08:00:00", now()).unwrap();
        assert_eq!(event.direction, Direction::CheckIn);
        assert!(!event.timestamp_inferred);
    }

    #[test]
    fn test_nonzero_status_is_check_out() {
        let event = from_iclock_line("12\t2024-01-01 18:00:00\t1\t1\t0", now()).unwrap();
        assert_eq!(event.direction, Direction::CheckOut);
    }

    #[test]
    fn test_short_and_blank_lines_ignored() {
        assert!(from_iclock_line("", now()).is_none());
        assert!(from_iclock_line("   ", now()).is_none());
        assert!(from_iclock_line("12", now()).is_none());
        assert!(from_iclock_line("\t2024-01-01 00:00:00", now()).is_none());
    }

    #[test]
    fn test_bad_timestamp_uses_now() {
        let event = from_iclock_line("3\tnot-a-time\t0", now()).unwrap();
        assert!(event.timestamp_inferred);
        assert_eq!(event.timestamp, now());
    }

    #[test]
    fn test_body_with_crlf_and_blank_lines() {
        let body = "1\t2024-01-01 08:00:00\t0\t1\t0\r\n\r\n2\t2024-01-01 08:01:00\t1\t1\t0\r\nbogus\n";
        let events = from_iclock_body(body, now());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user_id, "1");
        assert_eq!(events[1].user_id, "2");
        assert_eq!(events[1].direction, Direction::CheckOut);
    }
}
