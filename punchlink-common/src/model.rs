//! Attendance event model
//!
//! Every ingress path converges on [`AttendanceEvent`]. What leaves the relay
//! is one of two projections: [`UploadRecord`] for the HRMS backend and
//! [`AttendanceLog`] for the operator.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time;

/// Absolute point in time, carrying the offset it was observed with
pub type Timestamp = DateTime<FixedOffset>;

/// Check-in or check-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "Check In")]
    CheckIn,
    #[serde(rename = "Check Out")]
    CheckOut,
}

impl Direction {
    /// Device punch code: `0` is a check-in, everything else a check-out
    pub fn from_punch_code(code: i64) -> Self {
        if code == 0 {
            Direction::CheckIn
        } else {
            Direction::CheckOut
        }
    }

    /// Interpret a textual punch value
    ///
    /// Numeric strings are punch codes. Otherwise `"Check In"`/`"Check Out"`
    /// (any case, with or without separators) are explicit statuses. Anything
    /// unrecognised is a check-out.
    pub fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return Self::from_punch_code(code);
        }
        Self::from_status_label(trimmed).unwrap_or(Direction::CheckOut)
    }

    /// Parse an explicit status label
    pub fn from_status_label(label: &str) -> Option<Self> {
        let folded: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "checkin" | "in" => Some(Direction::CheckIn),
            "checkout" | "out" => Some(Direction::CheckOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CheckIn => "Check In",
            Direction::CheckOut => "Check Out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingress path an event came from (diagnostics only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProtocol {
    DevicePull,
    JsonWebhook,
    IClockPush,
}

/// Backend environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    /// `"prod"` (any case) selects production; anything else is dev
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("prod") {
            Environment::Prod
        } else {
            Environment::Dev
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical attendance event
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    /// Device user identifier, never empty
    pub user_id: String,
    /// Resolved name or `"User {user_id}"`
    pub display_name: String,
    pub timestamp: Timestamp,
    pub direction: Direction,
    pub source: SourceProtocol,
    /// Set when the source timestamp could not be parsed and ingestion time
    /// was substituted
    pub timestamp_inferred: bool,
}

impl AttendanceEvent {
    /// Placeholder display name for users missing from the directory
    pub fn placeholder_name(user_id: &str) -> String {
        format!("User {}", user_id)
    }

    /// Backend wire projection
    pub fn upload_record(&self) -> UploadRecord {
        UploadRecord {
            date_time: time::to_wire(&self.timestamp),
            name: self.display_name.clone(),
            status: self.direction,
            number: self.user_id.clone(),
        }
    }

    /// Operator-facing projection
    pub fn log_entry(&self) -> AttendanceLog {
        AttendanceLog {
            user_id: self.user_id.clone(),
            name: self.display_name.clone(),
            number: self.user_id.clone(),
            date_time: time::to_wire(&self.timestamp),
            status: self.direction,
        }
    }
}

/// One element of the `/attendance/upload` request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    pub name: String,
    pub status: Direction,
    pub number: String,
}

/// Attendance row reported back to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceLog {
    pub user_id: String,
    pub name: String,
    pub number: String,
    #[serde(rename = "dateTime")]
    pub date_time: String,
    pub status: Direction,
}

/// User record as listed by the time-clock device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceUser {
    /// Internal device slot
    pub uid: u16,
    pub user_id: String,
    pub name: String,
    pub privilege: u8,
    pub password: String,
    pub group_id: String,
}

/// Attendance record as stored on the time-clock device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAttendance {
    pub user_id: String,
    /// Device wall-clock time
    pub timestamp: NaiveDateTime,
    pub punch: u8,
}
