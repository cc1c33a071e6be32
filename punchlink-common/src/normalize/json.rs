//! JSON webhook normalizer
//!
//! Devices and middleware have posted several historical document shapes.
//! Each shape is a pure matcher tried in a fixed priority order; the first
//! one that yields an event wins.

use serde_json::{Map, Value};
use tracing::warn;

use super::NormalizeError;
use crate::model::{AttendanceEvent, Direction, SourceProtocol, Timestamp};
use crate::time;

/// Identity keys in probe order. `number` lets the relay's own wire records
/// be read back.
const USER_ID_KEYS: [&str; 4] = ["user_id", "userId", "UserID", "number"];
const TIMESTAMP_KEYS: [&str; 5] = ["timestamp", "time", "datetime", "DateTime", "dateTime"];
const PUNCH_KEYS: [&str; 3] = ["punch", "status", "Punch"];
const NAME_KEYS: [&str; 3] = ["name", "Name", "user_name"];

/// Detected document shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    /// Record fields at the top level
    Direct,
    /// Record under `data` (first element if an array)
    DataNested,
    /// Record under `attendance` (first element if an array)
    AttendanceNested,
}

impl JsonShape {
    pub const PRIORITY: [JsonShape; 3] =
        [JsonShape::Direct, JsonShape::DataNested, JsonShape::AttendanceNested];

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonShape::Direct => "direct",
            JsonShape::DataNested => "data",
            JsonShape::AttendanceNested => "attendance",
        }
    }

    /// Try to read an event from `raw` assuming this shape
    pub fn extract(self, raw: &Value, now: Timestamp) -> Option<AttendanceEvent> {
        let record = match self {
            JsonShape::Direct => raw.as_object(),
            JsonShape::DataNested => nested_record(raw, "data"),
            JsonShape::AttendanceNested => nested_record(raw, "attendance"),
        }?;
        read_record(record, now)
    }
}

/// Normalize one webhook document
///
/// `now` is substituted when the timestamp is missing or unparseable.
pub fn from_json(raw: &Value, now: Timestamp) -> Result<(AttendanceEvent, JsonShape), NormalizeError> {
    JsonShape::PRIORITY
        .iter()
        .find_map(|shape| shape.extract(raw, now).map(|event| (event, *shape)))
        .ok_or_else(|| NormalizeError::UnrecognizedFormat {
            received: raw.clone(),
        })
}

fn nested_record<'a>(raw: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    match raw.get(key)? {
        Value::Array(items) => items.first()?.as_object(),
        other => other.as_object(),
    }
}

/// First key whose value is present, non-null and not an empty string
fn probe<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| record.get(*key)).find(|value| match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_record(record: &Map<String, Value>, now: Timestamp) -> Option<AttendanceEvent> {
    let user_id = probe(record, &USER_ID_KEYS).and_then(scalar_text)?;

    let display_name = probe(record, &NAME_KEYS)
        .and_then(scalar_text)
        .unwrap_or_else(|| AttendanceEvent::placeholder_name(&user_id));

    let (timestamp, timestamp_inferred) = match probe(record, &TIMESTAMP_KEYS) {
        Some(Value::String(raw)) => match parse_timestamp(raw) {
            Some(ts) => (ts, false),
            None => {
                warn!(user_id = %user_id, timestamp = %raw, "Could not parse timestamp, using current time");
                (now, true)
            }
        },
        Some(other) => {
            warn!(user_id = %user_id, timestamp = %other, "Non-string timestamp, using current time");
            (now, true)
        }
        None => {
            warn!(user_id = %user_id, "No timestamp provided, using current time");
            (now, true)
        }
    };

    Some(AttendanceEvent {
        display_name,
        timestamp,
        direction: read_direction(probe(record, &PUNCH_KEYS)),
        source: SourceProtocol::JsonWebhook,
        timestamp_inferred,
        user_id,
    })
}

fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    time::parse_iso8601(raw).or_else(|| time::parse_with_formats(raw, &time::WEBHOOK_FALLBACK_FORMATS))
}

/// Punch code (number or numeric string) or explicit status label.
/// A record without any punch field counts as a check-in.
fn read_direction(value: Option<&Value>) -> Direction {
    match value {
        None => Direction::CheckIn,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(code) => Direction::from_punch_code(code),
            None => {
                if n.as_f64() == Some(0.0) {
                    Direction::CheckIn
                } else {
                    Direction::CheckOut
                }
            }
        },
        Some(Value::String(s)) => Direction::from_text(s),
        Some(_) => Direction::CheckOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn now() -> Timestamp {
        time::parse_iso8601("2024-05-01T12:00:00+00:00").unwrap()
    }

    fn parse(raw: Value) -> AttendanceEvent {
        from_json(&raw, now()).unwrap().0
    }

    #[test]
    fn test_all_shapes_produce_identical_event() {
        let shapes = vec![
            json!({"user_id": "42", "timestamp": "2024-05-01 08:30:00", "punch": 0, "name": "Jane"}),
            json!({"userId": "42", "time": "2024-05-01 08:30:00", "status": 0, "Name": "Jane"}),
            json!({"UserID": "42", "DateTime": "2024-05-01 08:30:00", "Punch": "0", "user_name": "Jane"}),
            json!({"data": {"user_id": "42", "timestamp": "2024-05-01 08:30:00", "punch": 0, "name": "Jane"}}),
            json!({"data": [{"userId": "42", "time": "2024-05-01 08:30:00", "punch": "0", "name": "Jane"}]}),
            json!({"attendance": {"user_id": "42", "timestamp": "2024-05-01 08:30:00", "punch": 0, "name": "Jane"}}),
            json!({"attendance": [{"user_id": 42, "datetime": "2024-05-01 08:30:00", "punch": 0, "name": "Jane"}]}),
        ];

        let events: Vec<AttendanceEvent> = shapes.into_iter().map(parse).collect();
        let first = &events[0];
        assert_eq!(first.user_id, "42");
        assert_eq!(first.display_name, "Jane");
        assert_eq!(first.direction, Direction::CheckIn);
        assert!(!first.timestamp_inferred);
        for event in &events {
            assert_eq!(event, first);
        }
    }

    #[test]
    fn test_date_only_timestamp_is_kept() {
        let event = parse(json!({"user_id": "1", "timestamp": "2024-04-01"}));
        assert!(!event.timestamp_inferred);
        let midnight = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(event.timestamp, time::from_local_naive(midnight));
    }

    #[test]
    fn test_shape_detection_order() {
        let (_, shape) = from_json(&json!({"user_id": "1", "data": {"user_id": "2"}}), now()).unwrap();
        assert_eq!(shape, JsonShape::Direct);

        let (event, shape) = from_json(&json!({"data": {"user_id": "2"}}), now()).unwrap();
        assert_eq!(shape, JsonShape::DataNested);
        assert_eq!(event.user_id, "2");

        let (event, shape) =
            from_json(&json!({"data": {"foo": 1}, "attendance": [{"userId": "3"}]}), now()).unwrap();
        assert_eq!(shape, JsonShape::AttendanceNested);
        assert_eq!(event.user_id, "3");
    }

    #[test]
    fn test_punch_zero_integer_and_string_are_check_in() {
        assert_eq!(parse(json!({"user_id": "1", "punch": 0})).direction, Direction::CheckIn);
        assert_eq!(parse(json!({"user_id": "1", "punch": "0"})).direction, Direction::CheckIn);
        assert_eq!(parse(json!({"user_id": "1", "punch": 1})).direction, Direction::CheckOut);
        assert_eq!(parse(json!({"user_id": "1", "punch": "4"})).direction, Direction::CheckOut);
        assert_eq!(parse(json!({"data": {"user_id": "1", "punch": 0}})).direction, Direction::CheckIn);
        assert_eq!(parse(json!({"attendance": {"user_id": "1", "punch": "2"}})).direction, Direction::CheckOut);
    }

    #[test]
    fn test_punch_zero_not_skipped_in_favour_of_status() {
        let event = parse(json!({"user_id": "1", "punch": 0, "status": "Check Out"}));
        assert_eq!(event.direction, Direction::CheckIn);
    }

    #[test]
    fn test_explicit_status_label() {
        assert_eq!(parse(json!({"user_id": "1", "status": "Check Out"})).direction, Direction::CheckOut);
        assert_eq!(parse(json!({"user_id": "1", "status": "Check In"})).direction, Direction::CheckIn);
    }

    #[test]
    fn test_missing_punch_defaults_to_check_in() {
        assert_eq!(parse(json!({"user_id": "1"})).direction, Direction::CheckIn);
    }

    #[test]
    fn test_missing_name_is_synthesized() {
        let event = parse(json!({"user_id": 17, "timestamp": "2024-05-01T08:00:00Z"}));
        assert_eq!(event.user_id, "17");
        assert_eq!(event.display_name, "User 17");
    }

    #[test]
    fn test_iso_timestamp_with_zulu() {
        let event = parse(json!({"user_id": "1", "timestamp": "2024-05-01T08:00:00Z"}));
        assert_eq!(event.timestamp, time::parse_iso8601("2024-05-01T08:00:00+00:00").unwrap());
    }

    #[test]
    fn test_day_first_fallback_format() {
        let event = parse(json!({"user_id": "1", "timestamp": "01-05-2024 08:00:00"}));
        assert!(!event.timestamp_inferred);
        assert_eq!(
            event.timestamp,
            time::parse_with_formats("2024-05-01 08:00:00", &time::WEBHOOK_FALLBACK_FORMATS).unwrap()
        );
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_now() {
        let event = parse(json!({"user_id": "1", "timestamp": "yesterday-ish"}));
        assert!(event.timestamp_inferred);
        assert_eq!(event.timestamp, now());
    }

    #[test]
    fn test_missing_or_numeric_timestamp_falls_back_to_now() {
        assert!(parse(json!({"user_id": "1"})).timestamp_inferred);
        assert!(parse(json!({"user_id": "1", "timestamp": 1714550400})).timestamp_inferred);
    }

    #[test]
    fn test_empty_identity_is_ignored() {
        let event = parse(json!({"user_id": "", "userId": "8"}));
        assert_eq!(event.user_id, "8");
    }

    #[test]
    fn test_unrecognized_payload_echoed() {
        let raw = json!({"employee": "42", "when": "now"});
        let err = from_json(&raw, now()).unwrap_err();
        assert_eq!(err.received(), &raw);
        assert_eq!(err.to_string(), "Invalid data format");
    }

    #[test]
    fn test_nested_without_identity_is_unrecognized() {
        assert!(from_json(&json!({"data": [{"timestamp": "2024-05-01 08:00:00"}]}), now()).is_err());
        assert!(from_json(&json!({"attendance": []}), now()).is_err());
        assert!(from_json(&json!("not an object"), now()).is_err());
        assert!(from_json(&Value::Null, now()).is_err());
    }

    #[test]
    fn test_wire_record_round_trip() {
        let ts = time::parse_iso8601("2024-05-01T08:30:00+02:00").unwrap();
        let original = AttendanceEvent {
            user_id: "42".to_string(),
            display_name: "Jane".to_string(),
            timestamp: ts,
            direction: Direction::CheckIn,
            source: SourceProtocol::DevicePull,
            timestamp_inferred: false,
        };

        let wire = serde_json::to_value(original.upload_record()).unwrap();
        assert_eq!(
            wire,
            json!({"dateTime": "2024-05-01T08:30:00+02:00", "name": "Jane", "status": "Check In", "number": "42"})
        );

        let (parsed, shape) = from_json(&wire, now()).unwrap();
        assert_eq!(shape, JsonShape::Direct);
        assert_eq!(parsed.user_id, original.user_id);
        assert_eq!(parsed.display_name, original.display_name);
        assert_eq!(parsed.timestamp, original.timestamp);
        assert_eq!(parsed.direction, original.direction);
        assert_eq!(parsed.source, SourceProtocol::JsonWebhook);
    }
}
