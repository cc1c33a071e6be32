//! Operator sessions
//!
//! Sessions live in process memory, keyed by a random id carried in the
//! `punchlink_session` cookie. They expire after 24 hours and do not
//! survive a restart.

use axum::http::{header, HeaderMap};
use punchlink_common::config::BackendConfig;
use punchlink_common::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "punchlink_session";
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend tokens kept for the session; never sent back to the browser
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub environment: Environment,
    pub tokens: SessionTokens,
    expires_at: Instant,
}

impl Session {
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.access_token.as_deref()
    }
}

/// Shared in-memory session table
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session from a successful backend login
    pub async fn create(&self, login: &LoginResponse, environment: Environment) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session {
            user_id: login.user_id(),
            email: login.user_field("email"),
            role: login.user_field("role"),
            environment,
            tokens: login.tokens(),
            expires_at: Instant::now() + self.ttl,
        };

        let mut sessions = self.sessions.write().await;
        // Piggyback cleanup on writes
        sessions.retain(|_, s| s.expires_at > Instant::now());
        sessions.insert(id, session);
        id
    }

    /// Look up a live session
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .filter(|s| s.expires_at > Instant::now())
            .cloned()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Session id from the request's `Cookie` headers
pub fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn session_cookie(id: Uuid, ttl: Duration) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        id,
        ttl.as_secs()
    )
}

pub fn expired_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Operator credentials forwarded to the backend login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
    pub role: String,
}

/// Parsed backend login reply
#[derive(Debug, Clone)]
pub struct LoginResponse(pub Value);

impl LoginResponse {
    /// Backend user object, `{}` when absent
    pub fn user(&self) -> Value {
        self.0
            .get("user")
            .filter(|u| u.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    fn user_id(&self) -> Option<String> {
        self.user_field("_id").or_else(|| self.user_field("id"))
    }

    fn user_field(&self, key: &str) -> Option<String> {
        match self.0.get("user")?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Tokens from whichever layout the backend used:
    /// `tokens.{access_token|accessToken}`, top-level
    /// `access_token|accessToken`, then `data.tokens.*`
    pub fn tokens(&self) -> SessionTokens {
        let body = &self.0;
        let nested = body.get("tokens").filter(|t| is_present(t));
        if let Some(tokens) = nested {
            if let Some(found) = token_pair(tokens) {
                return found;
            }
        }
        if let Some(found) = token_pair(body) {
            return found;
        }
        if nested.is_none() {
            if let Some(found) = body.pointer("/data/tokens").and_then(token_pair) {
                return found;
            }
        }
        SessionTokens::default()
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn token_pair(value: &Value) -> Option<SessionTokens> {
    if let Some(access) = string_at(value, "access_token") {
        return Some(SessionTokens {
            access_token: Some(access),
            refresh_token: string_at(value, "refresh_token"),
        });
    }
    string_at(value, "accessToken").map(|access| SessionTokens {
        access_token: Some(access),
        refresh_token: string_at(value, "refreshToken"),
    })
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Failed to connect to {0} backend: no backend URL configured")]
    NotConfigured(Environment),

    #[error("Failed to connect to {environment} backend: {reason}")]
    Network { environment: Environment, reason: String },

    #[error("Login failed with status {0}")]
    Rejected(u16),

    #[error("Invalid response format from backend")]
    InvalidResponse,
}

/// Authenticate against `{base}/auth/login`
pub async fn backend_login(
    client: &reqwest::Client,
    backend: &BackendConfig,
    environment: Environment,
    credentials: &LoginCredentials,
) -> Result<LoginResponse, LoginError> {
    let url = backend
        .login_url(environment)
        .ok_or(LoginError::NotConfigured(environment))?;
    debug!(url = %url, email = %credentials.email, "Calling backend login");

    let response = client
        .post(&url)
        .header("x-tenant", &backend.tenant)
        .timeout(LOGIN_TIMEOUT)
        .json(credentials)
        .send()
        .await
        .map_err(|e| LoginError::Network {
            environment,
            reason: e.to_string(),
        })?;

    let status = response.status().as_u16();
    if status != 200 && status != 201 {
        warn!(environment = %environment, status, "Backend login rejected");
        return Err(LoginError::Rejected(status));
    }

    let body: Value = response.json().await.map_err(|_| LoginError::InvalidResponse)?;
    info!(environment = %environment, email = %credentials.email, "Backend login succeeded");
    Ok(LoginResponse(body))
}
