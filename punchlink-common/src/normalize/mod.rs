//! Normalizers: raw ingress records into [`AttendanceEvent`]
//!
//! Each source encoding has its own entry point:
//! - [`from_device`] for structured records pulled from the device
//! - [`from_json`] for webhook documents in any of the known shapes
//! - [`from_iclock_line`] / [`from_iclock_body`] for iClock push text
//!
//! None of them panic on bad input. Records that cannot be interpreted are
//! either skipped (iClock) or reported as [`NormalizeError::UnrecognizedFormat`]
//! with the original payload attached.

mod iclock;
mod json;

pub use iclock::{from_iclock_body, from_iclock_line};
pub use json::{from_json, JsonShape};

use serde_json::Value;
use thiserror::Error;

use crate::directory::UserDirectory;
use crate::model::{AttendanceEvent, DeviceAttendance, Direction, SourceProtocol};
use crate::time;

#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Payload matched none of the known shapes
    #[error("Invalid data format")]
    UnrecognizedFormat { received: Value },
}

impl NormalizeError {
    /// Payload that failed to normalize, for operator diagnosis
    pub fn received(&self) -> &Value {
        match self {
            NormalizeError::UnrecognizedFormat { received } => received,
        }
    }
}

/// Normalize a record pulled from the device
pub fn from_device(
    record: &DeviceAttendance,
    directory: &UserDirectory,
) -> Result<AttendanceEvent, NormalizeError> {
    let user_id = record.user_id.trim();
    if user_id.is_empty() {
        return Err(NormalizeError::UnrecognizedFormat {
            received: serde_json::to_value(record).unwrap_or(Value::Null),
        });
    }

    Ok(AttendanceEvent {
        user_id: user_id.to_string(),
        display_name: directory.resolve(user_id),
        timestamp: time::from_local_naive(record.timestamp),
        direction: Direction::from_punch_code(i64::from(record.punch)),
        source: SourceProtocol::DevicePull,
        timestamp_inferred: false,
    })
}
