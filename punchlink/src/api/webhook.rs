//! ADMS JSON webhook
//!
//! Devices and middleware post single attendance records here in one of
//! several JSON shapes (or as form fields / query parameters). The record is
//! forwarded immediately; the caller always gets 200 once the record is
//! understood, even if the backend upload failed.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use punchlink_common::normalize;
use punchlink_common::{time, Environment};
use serde_json::{json, Map, Value};
use std::slice;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::forwarder::{CallPath, Credential};
use crate::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const API_KEY_PARAM: &str = "api_key";

/// How the payload arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
    Query,
    Raw,
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/adms/webhook", get(receive).post(receive))
}

/// GET|POST /adms/webhook
pub async fn receive(State(state): State<AppState>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let query = query_pairs(&uri);

    if let Some(expected) = state.config.adms.api_key.as_deref() {
        let provided = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .or_else(|| query.iter().find(|(k, _)| k == API_KEY_PARAM).map(|(_, v)| v.as_str()));
        if provided != Some(expected) {
            warn!("Webhook rejected: invalid API key");
            return ApiError::Unauthorized("Invalid API key".to_string()).into_response();
        }
    }

    let (data, format) = decode_body(&headers, &body, &query);
    debug!(?format, payload = %data, "Webhook payload received");

    let environment = data
        .get("environment")
        .and_then(Value::as_str)
        .map(Environment::parse)
        .unwrap_or(state.config.adms.default_environment);

    let (event, shape) = match normalize::from_json(&data, time::now()) {
        Ok(parsed) => parsed,
        Err(e) => {
            state.counters.record_unrecognized();
            warn!(?format, received = %e.received(), "Webhook payload not recognized");
            let body = Json(json!({
                "error": e.to_string(),
                "received": e.received(),
            }));
            return (StatusCode::BAD_REQUEST, body).into_response();
        }
    };
    state.counters.observe(&event);
    info!(
        user_id = %event.user_id,
        direction = %event.direction,
        shape = shape.as_str(),
        environment = %environment,
        "Webhook attendance received"
    );

    let credential = Credential::service(state.config.adms.service_token.as_deref());
    let outcome = state
        .forwarder
        .forward(slice::from_ref(&event), environment, &credential, CallPath::Webhook)
        .await;

    let log = event.log_entry();
    let body = if outcome.success {
        json!({
            "success": true,
            "message": "Attendance recorded successfully",
            "data": log,
            "upload": outcome.result,
        })
    } else {
        json!({
            "success": true,
            "message": "Received but upload failed",
            "data": log,
            "error": outcome.error,
        })
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default()
}

fn is_content_type(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let mime = v.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case(expected) || (expected == "application/json" && mime.ends_with("+json"))
        })
        .unwrap_or(false)
}

fn object_from_pairs<'a, I>(pairs: I) -> Value
where
    I: IntoIterator<Item = &'a (String, String)>,
{
    let map: Map<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

/// Decode the payload: JSON body, form body, query parameters, then raw
/// body as JSON (`{}` when that fails too)
pub fn decode_body(headers: &HeaderMap, body: &[u8], query: &[(String, String)]) -> (Value, BodyFormat) {
    if is_content_type(headers, "application/json") {
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            return (value, BodyFormat::Json);
        }
    }

    if is_content_type(headers, "application/x-www-form-urlencoded") && !body.is_empty() {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            if !pairs.is_empty() {
                return (object_from_pairs(&pairs), BodyFormat::Form);
            }
        }
    }

    let fields: Vec<&(String, String)> = query.iter().filter(|(k, _)| k != API_KEY_PARAM).collect();
    if !fields.is_empty() {
        return (object_from_pairs(fields), BodyFormat::Query);
    }

    let value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Map::new()))
    };
    (value, BodyFormat::Raw)
}
