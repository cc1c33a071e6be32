//! Time-clock device access
//!
//! The pipeline only needs two capabilities from a device: list users and
//! list attendance records. [`DeviceConnector`] opens a [`DeviceSession`]
//! that provides them; [`zk::ZkConnector`] implements it over the ZKTeco TCP
//! protocol.

pub mod zk;

use async_trait::async_trait;
use punchlink_common::model::{DeviceAttendance, DeviceUser};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Default ZKTeco communication port
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Device transport errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to connect to device {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Device did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Device rejected the communication key")]
    Unauthorized,

    #[error("Device protocol error: {0}")]
    Protocol(String),

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// `host[:port]` of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    /// Parse `host` or `host:port` (port defaults to 4370)
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("IP address is required".to_string());
        }

        match value.split_once(':') {
            Some((host, port)) => {
                let host = host.trim();
                if host.is_empty() {
                    return Err(format!("Invalid device address: {}", value));
                }
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| format!("Invalid device port in {}", value))?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: value.to_string(),
                port: DEFAULT_DEVICE_PORT,
            }),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens sessions to devices
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// One exclusive connection to a device
///
/// Callers must call [`DeviceSession::disconnect`] on every exit path;
/// dropping a session closes the socket but skips the protocol goodbye.
#[async_trait]
pub trait DeviceSession: Send {
    async fn list_users(&mut self) -> Result<Vec<DeviceUser>, DeviceError>;

    async fn list_attendance(&mut self) -> Result<Vec<DeviceAttendance>, DeviceError>;

    async fn disconnect(self: Box<Self>) -> Result<(), DeviceError>;
}

/// Release a session, logging (not propagating) goodbye failures
pub async fn release(session: Box<dyn DeviceSession>, address: &DeviceAddress) {
    if let Err(e) = session.disconnect().await {
        warn!(device = %address, error = %e, "Device disconnect failed");
    }
}

/// Connect, list users, and disconnect
pub async fn list_users(
    connector: &dyn DeviceConnector,
    address: &DeviceAddress,
) -> Result<Vec<DeviceUser>, DeviceError> {
    let mut session = connector.connect(address).await?;
    let users = session.list_users().await;
    release(session, address).await;
    users
}
