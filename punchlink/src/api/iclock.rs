//! iClock push protocol endpoints
//!
//! The device polls `/iclock/getrequest` as a heartbeat and posts
//! tab-separated punch lines to `/iclock/cdata`. Every request is answered
//! with plain `OK`; anything else makes the device retry the same batch.

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    routing::get,
    Router,
};
use punchlink_common::{normalize, time, AttendanceEvent};
use tracing::{debug, info};

use crate::forwarder::{CallPath, Credential};
use crate::AppState;

const ACK: &str = "OK";
const ATTENDANCE_TABLE: &str = "ATTLOG";

#[derive(Debug, Default, PartialEq)]
pub struct CdataQuery {
    /// Device serial number
    pub serial: Option<String>,
    pub table: Option<String>,
}

impl CdataQuery {
    /// Decode the push parameters without ever rejecting the request
    ///
    /// Repeated keys keep their first value; a malformed query is empty.
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs: Vec<(String, String)> = raw
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default();
        let first = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        Self {
            serial: first("SN"),
            table: first("table"),
        }
    }
}

pub fn iclock_routes() -> Router<AppState> {
    Router::new()
        .route("/iclock/getrequest", get(heartbeat))
        .route("/iclock/cdata", get(heartbeat).post(receive_data))
}

/// GET /iclock/getrequest, GET /iclock/cdata
pub async fn heartbeat() -> &'static str {
    ACK
}

/// POST /iclock/cdata
///
/// Parses the batch, drops backlog, forwards the live records as one upload.
pub async fn receive_data(State(state): State<AppState>, RawQuery(raw): RawQuery, body: Bytes) -> &'static str {
    let query = CdataQuery::parse(raw.as_deref());
    if let Some(table) = query.table.as_deref() {
        if !table.eq_ignore_ascii_case(ATTENDANCE_TABLE) {
            debug!(table, serial = ?query.serial, "Ignoring non-attendance table push");
            return ACK;
        }
    }

    let text = String::from_utf8_lossy(&body);
    if text.trim().is_empty() {
        return ACK;
    }

    let now = time::now();
    let live: Vec<AttendanceEvent> = normalize::from_iclock_body(&text, now)
        .into_iter()
        .filter(|event| {
            state.counters.observe(event);
            if state.recency.is_live(event.timestamp, now) {
                return true;
            }
            state.counters.record_backlog_filtered();
            debug!(
                user_id = %event.user_id,
                timestamp = %time::to_wire(&event.timestamp),
                "Dropping backlog record"
            );
            false
        })
        .collect();

    for event in &live {
        info!(
            user_id = %event.user_id,
            direction = %event.direction,
            timestamp = %time::to_wire(&event.timestamp),
            serial = ?query.serial,
            "Real-time punch"
        );
    }
    if live.is_empty() {
        return ACK;
    }

    let environment = state.config.adms.default_environment;
    if !state.forwarder.is_configured(environment) {
        debug!(environment = %environment, "No backend configured, punches not forwarded");
        return ACK;
    }

    let credential = Credential::service(state.config.adms.service_token.as_deref());
    // Outcome is logged by the forwarder; the device only needs the ack
    let _ = state
        .forwarder
        .forward(&live, environment, &credential, CallPath::IClock)
        .await;
    ACK
}
