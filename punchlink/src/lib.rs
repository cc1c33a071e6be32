//! punchlink library - attendance relay service
//!
//! Receives attendance from time-clock devices (pulled over the device
//! protocol, pushed as JSON webhooks or iClock text) and forwards
//! normalized records to the HRMS backend.

use axum::Router;
use punchlink_common::config::RelayConfig;
use punchlink_common::{time, PipelineCounters, RecencyFilter};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod device;
pub mod error;
pub mod forwarder;
pub mod session;
pub mod sync;

use device::DeviceConnector;
use forwarder::BackendForwarder;
use session::SessionStore;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<RelayConfig>,
    /// HRMS backend client
    pub forwarder: BackendForwarder,
    /// Opens device sessions for pull syncs
    pub devices: Arc<dyn DeviceConnector>,
    /// Operator sessions
    pub sessions: SessionStore,
    /// Live/backlog split for iClock pushes
    pub recency: RecencyFilter,
    pub counters: Arc<PipelineCounters>,
    /// Server startup time (for uptime)
    pub startup_time: Instant,
}

impl AppState {
    /// Create application state; the recency filter is anchored at this call
    pub fn new(config: RelayConfig, devices: Arc<dyn DeviceConnector>) -> Result<Self, reqwest::Error> {
        let counters = Arc::new(PipelineCounters::new());
        let forwarder = BackendForwarder::new(config.backend.clone(), counters.clone())?;

        Ok(Self {
            config: Arc::new(config),
            forwarder,
            devices,
            sessions: SessionStore::default(),
            recency: RecencyFilter::new(time::now()),
            counters,
            startup_time: Instant::now(),
        })
    }

    pub fn with_recency(mut self, recency: RecencyFilter) -> Self {
        self.recency = recency;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    // Operator routes (require a login session)
    let protected = Router::new()
        .route("/session", get(api::current_session))
        .route("/connect", post(api::connect_device))
        .route("/attendance", post(api::pull_attendance))
        .route("/devices", get(api::list_devices))
        .route("/hrms-urls", get(api::hrms_urls))
        .layer(middleware::from_fn_with_state(state.clone(), api::require_session));

    // Device-facing and status routes
    let public = Router::new()
        .route("/login", post(api::login))
        .route("/logout", get(api::logout))
        .merge(api::webhook_routes())
        .merge(api::iclock_routes())
        .merge(api::status_routes())
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
