//! Operator device endpoints: user listing and pull sync

use axum::{extract::State, Extension, Json};
use punchlink_common::Environment;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::device::{self, DeviceAddress};
use crate::error::{ApiError, ApiResult};
use crate::forwarder::Credential;
use crate::session::Session;
use crate::sync::{self, DateRange, SyncRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRequest {
    pub ip: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub environment: Option<String>,
}

fn device_address(ip: Option<&str>) -> ApiResult<DeviceAddress> {
    DeviceAddress::parse(ip.unwrap_or_default()).map_err(ApiError::BadRequest)
}

/// POST /connect
///
/// Lists the users enrolled on a device.
pub async fn connect_device(State(state): State<AppState>, Json(req): Json<ConnectRequest>) -> ApiResult<Json<Value>> {
    let address = device_address(req.ip.as_deref())?;
    let users = device::list_users(state.devices.as_ref(), &address).await?;
    info!(device = %address, users = users.len(), "Listed device users");

    Ok(Json(json!({
        "message": "Successfully connected to device",
        "users": users,
    })))
}

/// POST /attendance
///
/// Pulls the attendance log, filters it to the requested days and uploads
/// it with the session's token. Upload failure is reported in `upload`
/// alongside the logs; device failure is a 500.
pub async fn pull_attendance(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<AttendanceRequest>,
) -> ApiResult<Json<Value>> {
    let address = device_address(req.ip.as_deref())?;
    let range = DateRange::parse(req.start_date.as_deref(), req.end_date.as_deref()).map_err(ApiError::BadRequest)?;
    let environment = req
        .environment
        .as_deref()
        .map(Environment::parse)
        .unwrap_or(session.environment);

    let request = SyncRequest {
        address,
        range,
        environment,
        credential: Credential::session(session.access_token()),
    };
    let report = sync::run(state.devices.as_ref(), &state.forwarder, request).await?;

    Ok(Json(json!({
        "attendance": {
            "logs": report.logs,
            "userMap": report.user_map,
        },
        "upload": report.upload,
    })))
}

/// GET /devices
pub async fn list_devices(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "devices": state.config.devices }))
}

/// GET /hrms-urls
pub async fn hrms_urls(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "dev": state.config.hrms.dev,
        "prod": state.config.hrms.prod,
    }))
}
