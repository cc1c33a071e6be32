//! Operator login and session middleware

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use punchlink_common::Environment;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::session::{self, LoginCredentials, LoginError, Session};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub environment: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// POST /login
///
/// Authenticates against the selected backend and opens a session.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Response> {
    let (Some(email), Some(password), Some(role)) =
        (required(req.email), required(req.password), required(req.role))
    else {
        return Err(ApiError::BadRequest("Email, password, and role are required".to_string()));
    };
    let environment = req
        .environment
        .as_deref()
        .map(Environment::parse)
        .unwrap_or(state.config.backend.default_environment);

    let credentials = LoginCredentials { email, password, role };
    let reply = session::backend_login(
        state.forwarder.http_client(),
        &state.config.backend,
        environment,
        &credentials,
    )
    .await
    .map_err(login_error)?;

    let id = state.sessions.create(&reply, environment).await;
    info!(email = %credentials.email, environment = %environment, "Operator logged in");

    let cookie = session::session_cookie(id, state.sessions.ttl());
    let body = Json(json!({
        "success": true,
        "user": reply.user(),
        "environment": environment,
    }));
    Ok(([(header::SET_COOKIE, cookie)], body).into_response())
}

fn login_error(err: LoginError) -> ApiError {
    match err {
        LoginError::Rejected(status) => ApiError::Upstream(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            err.to_string(),
        ),
        other => ApiError::Internal(other.to_string()),
    }
}

/// GET /logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session::session_id(&headers) {
        if state.sessions.remove(id).await {
            debug!(session = %id, "Session cleared");
        }
    }
    (
        [(header::SET_COOKIE, session::expired_cookie())],
        Json(json!({ "success": true })),
    )
        .into_response()
}

/// GET /session
///
/// Reports who is logged in; tokens stay server-side.
pub async fn current_session(Extension(session): Extension<Session>) -> Json<serde_json::Value> {
    Json(json!({
        "authenticated": true,
        "user_id": session.user_id,
        "email": session.email,
        "role": session.role,
        "environment": session.environment,
    }))
}

/// Session middleware for operator routes
///
/// Returns 401 without a live session; otherwise makes the [`Session`]
/// available to handlers as an extension.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = match session::session_id(request.headers()) {
        Some(id) => state.sessions.get(id).await,
        None => None,
    };

    let Some(session) = session else {
        return Err(ApiError::Unauthorized("Authentication required".to_string()));
    };

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}
