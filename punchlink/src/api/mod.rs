//! HTTP API handlers for punchlink

pub mod auth;
pub mod device;
pub mod health;
pub mod iclock;
pub mod status;
pub mod webhook;

pub use auth::{current_session, login, logout, require_session};
pub use device::{connect_device, hrms_urls, list_devices, pull_attendance};
pub use health::health_routes;
pub use iclock::iclock_routes;
pub use status::status_routes;
pub use webhook::webhook_routes;
