//! Shared fixtures: mock HRMS backend, fake devices, request helpers

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use http_body_util::BodyExt;
use punchlink::device::{DeviceAddress, DeviceConnector, DeviceError, DeviceSession};
use punchlink::{build_router, AppState};
use punchlink_common::config::RelayConfig;
use punchlink_common::model::{DeviceAttendance, DeviceUser};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;

/// One request seen by the mock backend
#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub tenant: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

struct BackendState {
    hits: Mutex<Vec<Hit>>,
    upload_status: StatusCode,
    login_status: StatusCode,
}

/// Throwaway HRMS backend on an ephemeral port
pub struct MockBackend {
    pub url: String,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn start(upload_status: StatusCode, login_status: StatusCode) -> Self {
        let state = Arc::new(BackendState {
            hits: Mutex::new(Vec::new()),
            upload_status,
            login_status,
        });
        let app = Router::new()
            .route("/attendance/upload", post(upload))
            .route("/auth/login", post(mock_login))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state }
    }

    pub async fn ok() -> Self {
        Self::start(StatusCode::OK, StatusCode::OK).await
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Hit> {
        self.hits()
            .into_iter()
            .filter(|h| h.path == "/attendance/upload")
            .collect()
    }
}

fn record(state: &BackendState, path: &str, headers: &HeaderMap, body: Value) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    state.hits.lock().unwrap().push(Hit {
        path: path.to_string(),
        tenant: header("x-tenant"),
        authorization: header("authorization"),
        body,
    });
}

async fn upload(State(state): State<Arc<BackendState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let count = body.as_array().map(Vec::len).unwrap_or(0);
    record(&state, "/attendance/upload", &headers, body);
    if state.upload_status.is_success() {
        (state.upload_status, Json(json!({ "inserted": count }))).into_response()
    } else {
        (state.upload_status, "backend exploded").into_response()
    }
}

async fn mock_login(State(state): State<Arc<BackendState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let email = body["email"].clone();
    let role = body["role"].clone();
    record(&state, "/auth/login", &headers, body);
    if state.login_status.is_success() {
        let reply = json!({
            "user": { "_id": "u-1", "email": email, "role": role },
            "tokens": { "access_token": "tok-123", "refresh_token": "ref-456" }
        });
        (state.login_status, Json(reply)).into_response()
    } else {
        (state.login_status, Json(json!({ "message": "bad credentials" }))).into_response()
    }
}

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Device with two enrolled users (one unnamed) and three punches
#[derive(Clone, Default)]
pub struct FakeDevice;

struct FakeDeviceSession;

#[async_trait]
impl DeviceConnector for FakeDevice {
    async fn connect(&self, _address: &DeviceAddress) -> Result<Box<dyn DeviceSession>, DeviceError> {
        Ok(Box::new(FakeDeviceSession))
    }
}

#[async_trait]
impl DeviceSession for FakeDeviceSession {
    async fn list_users(&mut self) -> Result<Vec<DeviceUser>, DeviceError> {
        let user = |uid: u16, user_id: &str, name: &str| DeviceUser {
            uid,
            user_id: user_id.to_string(),
            name: name.to_string(),
            privilege: 0,
            password: String::new(),
            group_id: "1".to_string(),
        };
        Ok(vec![user(1, "42", "Jane Doe"), user(2, "7", "")])
    }

    async fn list_attendance(&mut self) -> Result<Vec<DeviceAttendance>, DeviceError> {
        let entry = |user_id: &str, timestamp, punch| DeviceAttendance {
            user_id: user_id.to_string(),
            timestamp,
            punch,
        };
        Ok(vec![
            entry("42", at(1, 9, 0), 0),
            entry("7", at(1, 17, 30), 1),
            entry("42", at(4, 9, 5), 0),
        ])
    }

    async fn disconnect(self: Box<Self>) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Device that cannot be reached
#[derive(Clone, Default)]
pub struct UnreachableDevice;

#[async_trait]
impl DeviceConnector for UnreachableDevice {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn DeviceSession>, DeviceError> {
        Err(DeviceError::Connect {
            address: address.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

pub fn config(backend_url: Option<&str>) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.backend.dev_url = backend_url.map(str::to_string);
    config
}

pub fn app_with<C>(config: RelayConfig, connector: C) -> Router
where
    C: DeviceConnector + 'static,
{
    let state = AppState::new(config, Arc::new(connector)).unwrap();
    build_router(state)
}

pub fn app(config: RelayConfig) -> Router {
    app_with(config, FakeDevice)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn text_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn with_cookie(mut request: Request<Body>, cookie: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("cookie", cookie.parse().unwrap());
    request
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Log in against the mock backend and return the session cookie pair
pub async fn login(app: &Router) -> String {
    let response = send(
        app,
        json_request(
            "POST",
            "/login",
            json!({ "email": "ops@example.com", "password": "pw", "role": "admin" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    cookie.split(';').next().unwrap().to_string()
}
