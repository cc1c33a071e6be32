//! HRMS backend forwarder
//!
//! Sends canonical events to `{base}/attendance/upload` for the selected
//! environment. Every call resolves to a [`ForwardOutcome`]; failures are
//! data, never errors, so ingress adapters can always answer their caller.

use punchlink_common::config::BackendConfig;
use punchlink_common::model::UploadRecord;
use punchlink_common::{AttendanceEvent, Environment, PipelineCounters};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Interactive (operator-triggered) upload timeout
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for uploads triggered by a pushing device or webhook
pub const AUTOMATED_TIMEOUT: Duration = Duration::from_secs(10);

const ERROR_BODY_LIMIT: usize = 200;

/// Which ingress path is forwarding; selects the timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPath {
    Interactive,
    Webhook,
    IClock,
}

impl CallPath {
    pub fn timeout(&self) -> Duration {
        match self {
            CallPath::Interactive => INTERACTIVE_TIMEOUT,
            CallPath::Webhook | CallPath::IClock => AUTOMATED_TIMEOUT,
        }
    }
}

/// Authorization attached to an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Token obtained at interactive login
    Session(String),
    /// Configured service token for automated paths
    Service(String),
    Anonymous,
}

impl Credential {
    /// Service credential, or anonymous when none is configured
    pub fn service(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Credential::Service(token.to_string()),
            _ => Credential::Anonymous,
        }
    }

    /// Session credential, or anonymous when the session holds no token
    pub fn session(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Credential::Session(token.to_string()),
            _ => Credential::Anonymous,
        }
    }

    pub fn bearer(&self) -> Option<&str> {
        match self {
            Credential::Session(token) | Credential::Service(token) => Some(token),
            Credential::Anonymous => None,
        }
    }
}

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardOutcome {
    pub success: bool,
    /// Backend response body (`{"success": true}` when it sent none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub environment: Environment,
}

impl ForwardOutcome {
    fn succeeded(result: Value, environment: Environment) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            environment,
        }
    }

    fn failed(error: ForwardError, environment: Environment) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(format!("Failed to upload to {} backend: {}", environment, error)),
            environment,
        }
    }
}

#[derive(Debug, Error)]
enum ForwardError {
    #[error("no backend URL configured")]
    NotConfigured,

    #[error("{0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// HTTP client for the HRMS backend
#[derive(Clone)]
pub struct BackendForwarder {
    http_client: reqwest::Client,
    backend: BackendConfig,
    counters: Arc<PipelineCounters>,
}

impl BackendForwarder {
    pub fn new(backend: BackendConfig, counters: Arc<PipelineCounters>) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("punchlink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            backend,
            counters,
        })
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Shared HTTP client (connection pool reused by login)
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Whether `environment` has a base URL configured
    pub fn is_configured(&self, environment: Environment) -> bool {
        self.backend.base_url(environment).is_some()
    }

    /// Upload `events` as one batch
    pub async fn forward(
        &self,
        events: &[AttendanceEvent],
        environment: Environment,
        credential: &Credential,
        path: CallPath,
    ) -> ForwardOutcome {
        let records: Vec<UploadRecord> = events.iter().map(AttendanceEvent::upload_record).collect();

        let outcome = match self.send(&records, environment, credential, path).await {
            Ok(result) => {
                info!(
                    environment = %environment,
                    records = records.len(),
                    ?path,
                    "Uploaded attendance to backend"
                );
                ForwardOutcome::succeeded(result, environment)
            }
            Err(err) => {
                warn!(
                    environment = %environment,
                    records = records.len(),
                    ?path,
                    error = %err,
                    "Backend upload failed"
                );
                ForwardOutcome::failed(err, environment)
            }
        };

        self.counters.record_forward(outcome.success);
        outcome
    }

    async fn send(
        &self,
        records: &[UploadRecord],
        environment: Environment,
        credential: &Credential,
        path: CallPath,
    ) -> Result<Value, ForwardError> {
        let url = self
            .backend
            .upload_url(environment)
            .ok_or(ForwardError::NotConfigured)?;

        debug!(url = %url, authenticated = credential.bearer().is_some(), "Posting attendance batch");

        let mut request = self
            .http_client
            .post(&url)
            .header("x-tenant", &self.backend.tenant)
            .timeout(path.timeout())
            .json(records);
        if let Some(token) = credential.bearer() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::Network(e.to_string()))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        Ok(interpret_success_body(&body))
    }
}

/// An empty body is an implicit success marker; non-JSON text is kept as a
/// string
fn interpret_success_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return json!({ "success": true });
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
