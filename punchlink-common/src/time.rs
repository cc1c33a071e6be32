//! Timestamp utilities
//!
//! Devices report wall-clock time without an offset. Those values are pinned
//! to the relay's local offset so every timestamp in the pipeline is an
//! absolute instant.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::model::Timestamp;

/// Fixed patterns accepted after ISO-8601 fails (JSON webhook).
pub const WEBHOOK_FALLBACK_FORMATS: [&str; 3] =
    ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%d-%m-%Y %H:%M:%S"];

/// Patterns used by the iClock push protocol.
pub const ICLOCK_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];

/// ISO-8601 forms without an offset.
const ISO_NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Current local time with its offset
pub fn now() -> Timestamp {
    Local::now().fixed_offset()
}

/// Interpret a device wall-clock value in the local time zone
///
/// Ambiguous local times (DST fold) take the earlier instant; nonexistent
/// ones (DST gap) are read as UTC.
pub fn from_local_naive(naive: NaiveDateTime) -> Timestamp {
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.fixed_offset(),
        None => Utc.from_utc_datetime(&naive).fixed_offset(),
    }
}

/// Parse an ISO-8601 timestamp
///
/// Accepts RFC 3339 (including a trailing `Z`) and offset-less forms, which
/// are taken as local time. A bare date means local midnight.
pub fn parse_iso8601(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts);
    }
    ISO_NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(from_local_naive)
}

/// Parse a wall-clock timestamp against an ordered list of patterns
pub fn parse_with_formats(value: &str, formats: &[&str]) -> Option<Timestamp> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(from_local_naive)
}

/// Format a timestamp the way the backend expects (`dateTime` field)
pub fn to_wire(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}
