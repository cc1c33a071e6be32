//! Pull sync: device → normalizer → backend
//!
//! Phases run in order `Connecting → FetchingUsers → FetchingRecords →
//! Normalizing → Forwarding`. A device failure aborts before any event is
//! produced; a forwarding failure still returns the normalized logs.

use chrono::{NaiveDate, NaiveDateTime};
use punchlink_common::model::{AttendanceLog, DeviceAttendance, DeviceUser};
use punchlink_common::normalize;
use punchlink_common::{Environment, UserDirectory};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::device::{self, DeviceAddress, DeviceConnector, DeviceError, DeviceSession};
use crate::forwarder::{BackendForwarder, CallPath, Credential, ForwardOutcome};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Connecting,
    FetchingUsers,
    FetchingRecords,
    Normalizing,
    Forwarding,
    Done,
    PartialFailure,
}

/// Inclusive calendar-day range on device wall-clock time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    start: Option<NaiveDateTime>,
    /// Midnight after the last included day
    end_exclusive: Option<NaiveDateTime>,
}

impl DateRange {
    /// Parse optional `YYYY-MM-DD` bounds; blank values are unbounded
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, String> {
        let start = parse_day("startDate", start)?.map(|day| day.and_time(chrono::NaiveTime::MIN));
        let end_exclusive = match parse_day("endDate", end)? {
            Some(day) => Some(
                day.succ_opt()
                    .ok_or_else(|| "endDate is out of range".to_string())?
                    .and_time(chrono::NaiveTime::MIN),
            ),
            None => None,
        };
        Ok(Self { start, end_exclusive })
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end_exclusive.map_or(true, |end| at < end)
    }
}

fn parse_day(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map(Some)
            .map_err(|_| format!("Invalid {}: {} (expected YYYY-MM-DD)", field, value)),
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub address: DeviceAddress,
    pub range: DateRange,
    pub environment: Environment,
    pub credential: Credential,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub logs: Vec<AttendanceLog>,
    #[serde(rename = "userMap")]
    pub user_map: HashMap<String, String>,
    pub upload: ForwardOutcome,
    pub phase: SyncPhase,
}

/// Run one pull sync
///
/// The device session is released before any error is returned.
pub async fn run(
    connector: &dyn DeviceConnector,
    forwarder: &BackendForwarder,
    request: SyncRequest,
) -> Result<SyncReport, DeviceError> {
    let address = &request.address;

    enter(SyncPhase::Connecting, address);
    let mut session = connector.connect(address).await?;
    let fetched = fetch(session.as_mut(), address).await;
    device::release(session, address).await;
    let (users, records) = fetched?;

    enter(SyncPhase::Normalizing, address);
    let directory = UserDirectory::from_users(&users);
    let total = records.len();
    let events: Vec<_> = records
        .iter()
        .filter(|record| request.range.contains(record.timestamp))
        .filter_map(|record| match normalize::from_device(record, &directory) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(device = %address, error = %e, received = %e.received(), "Skipping device record");
                None
            }
        })
        .collect();
    info!(
        device = %address,
        users = users.len(),
        records = total,
        in_range = events.len(),
        "Normalized device attendance"
    );

    enter(SyncPhase::Forwarding, address);
    let upload = forwarder
        .forward(&events, request.environment, &request.credential, CallPath::Interactive)
        .await;
    let phase = if upload.success {
        SyncPhase::Done
    } else {
        SyncPhase::PartialFailure
    };
    enter(phase, address);

    Ok(SyncReport {
        logs: events.iter().map(|event| event.log_entry()).collect(),
        user_map: directory.into_map(),
        upload,
        phase,
    })
}

async fn fetch(
    session: &mut dyn DeviceSession,
    address: &DeviceAddress,
) -> Result<(Vec<DeviceUser>, Vec<DeviceAttendance>), DeviceError> {
    enter(SyncPhase::FetchingUsers, address);
    let users = session.list_users().await?;
    enter(SyncPhase::FetchingRecords, address);
    let records = session.list_attendance().await?;
    Ok((users, records))
}

fn enter(phase: SyncPhase, address: &DeviceAddress) {
    debug!(device = %address, ?phase, "Pull sync phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use punchlink_common::config::BackendConfig;
    use punchlink_common::PipelineCounters;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    struct FakeSession {
        fail_records: bool,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DeviceSession for FakeSession {
        async fn list_users(&mut self) -> Result<Vec<DeviceUser>, DeviceError> {
            Ok(vec![DeviceUser {
                uid: 1,
                user_id: "42".to_string(),
                name: "Jane".to_string(),
                privilege: 0,
                password: String::new(),
                group_id: String::new(),
            }])
        }

        async fn list_attendance(&mut self) -> Result<Vec<DeviceAttendance>, DeviceError> {
            if self.fail_records {
                return Err(DeviceError::Protocol("log read failed".to_string()));
            }
            Ok(vec![
                DeviceAttendance { user_id: "42".to_string(), timestamp: at(1, 9), punch: 0 },
                DeviceAttendance { user_id: "7".to_string(), timestamp: at(2, 18), punch: 1 },
                DeviceAttendance { user_id: "42".to_string(), timestamp: at(5, 9), punch: 0 },
            ])
        }

        async fn disconnect(self: Box<Self>) -> Result<(), DeviceError> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        fail_records: bool,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DeviceConnector for FakeConnector {
        async fn connect(&self, _address: &DeviceAddress) -> Result<Box<dyn DeviceSession>, DeviceError> {
            Ok(Box::new(FakeSession {
                fail_records: self.fail_records,
                released: self.released.clone(),
            }))
        }
    }

    fn request(range: DateRange) -> SyncRequest {
        SyncRequest {
            address: DeviceAddress::parse("10.0.0.5").unwrap(),
            range,
            environment: Environment::Dev,
            credential: Credential::Anonymous,
        }
    }

    fn forwarder() -> BackendForwarder {
        BackendForwarder::new(BackendConfig::default(), Arc::new(PipelineCounters::new())).unwrap()
    }

    #[test]
    fn test_date_range_includes_whole_end_day() {
        let range = DateRange::parse(Some("2024-03-01"), Some("2024-03-02")).unwrap();
        assert!(range.contains(at(1, 0)));
        assert!(range.contains(at(2, 23)));
        assert!(!range.contains(at(3, 0)));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap().and_hms_opt(23, 59, 59).unwrap()));
    }

    #[test]
    fn test_date_range_unbounded() {
        let range = DateRange::parse(None, Some(" ")).unwrap();
        assert!(range.contains(at(1, 0)));
        assert!(range.contains(at(28, 0)));
    }

    #[test]
    fn test_date_range_rejects_bad_dates() {
        let err = DateRange::parse(Some("03/01/2024"), None).unwrap_err();
        assert!(err.contains("startDate"));
        assert!(DateRange::parse(None, Some("2024-13-01")).is_err());
    }

    #[tokio::test]
    async fn test_sync_keeps_logs_when_upload_fails() {
        let released = Arc::new(AtomicBool::new(false));
        let connector = FakeConnector { fail_records: false, released: released.clone() };
        let range = DateRange::parse(Some("2024-03-01"), Some("2024-03-02")).unwrap();

        let report = run(&connector, &forwarder(), request(range)).await.unwrap();

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(report.phase, SyncPhase::PartialFailure);
        assert!(!report.upload.success);
        assert_eq!(report.logs.len(), 2);
        assert_eq!(report.logs[0].name, "Jane");
        assert_eq!(report.logs[1].name, "User 7");
        assert_eq!(report.user_map.get("42").map(String::as_str), Some("Jane"));
    }

    #[tokio::test]
    async fn test_device_failure_aborts_and_releases() {
        let released = Arc::new(AtomicBool::new(false));
        let connector = FakeConnector { fail_records: true, released: released.clone() };

        let result = run(&connector, &forwarder(), request(DateRange::default())).await;

        assert!(matches!(result, Err(DeviceError::Protocol(_))));
        assert!(released.load(Ordering::SeqCst));
    }
}
