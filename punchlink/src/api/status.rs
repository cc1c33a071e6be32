//! Status endpoints for device setup

use axum::{extract::State, routing::get, Json, Router};
use punchlink_common::counters::CounterSnapshot;
use punchlink_common::Environment;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AdmsStatus {
    pub status: &'static str,
    pub endpoints: Value,
    pub protocols: [&'static str; 2],
    pub api_key_required: bool,
    pub default_environment: Environment,
    pub counters: CounterSnapshot,
}

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/adms/status", get(adms_status))
        .route("/network/ip", get(network_ip))
}

/// GET /adms/status
pub async fn adms_status(State(state): State<AppState>) -> Json<AdmsStatus> {
    Json(AdmsStatus {
        status: "active",
        endpoints: json!({
            "webhook": "/adms/webhook",
            "iclock_heartbeat": "/iclock/getrequest",
            "iclock_data": "/iclock/cdata",
        }),
        protocols: ["JSON Webhook", "iClock Protocol"],
        api_key_required: state.config.adms.api_key.is_some(),
        default_environment: state.config.adms.default_environment,
        counters: state.counters.snapshot(),
    })
}

/// Address devices on the LAN should push to; loopback when undetectable
pub fn local_ip() -> IpAddr {
    local_ip_address::local_ip().unwrap_or_else(|e| {
        warn!(error = %e, "Could not determine local IP address");
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}

/// GET /network/ip
///
/// What to enter as the server address on the device.
pub async fn network_ip(State(state): State<AppState>) -> Json<Value> {
    let ip = local_ip();
    let port = state.config.port;
    let server_url = format!("http://{}:{}", ip, port);

    Json(json!({
        "local_ip": ip.to_string(),
        "port": port,
        "server_url": server_url,
        "iclock_heartbeat": format!("{}/iclock/getrequest", server_url),
        "iclock_data": format!("{}/iclock/cdata", server_url),
        "message": format!("Configure your device Server Address to: {}", ip),
    }))
}
