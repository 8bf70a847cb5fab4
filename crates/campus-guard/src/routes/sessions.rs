//! Session lifecycle, sign-out and auth error endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campus_common::{GuardError, Role, SessionValidation};
use crate::auth_errors::{self, ClassifiedAuthError};
use crate::routes::{ApiError, client_ip};
use crate::session::fingerprint;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    role: Role,
    /// Login identifier (email) the auth rate limit was keyed on
    identifier: Option<String>,
    ip: Option<String>,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    session_id: Uuid,
    /// Short digest of the captured fingerprint
    fingerprint: String,
    idle_timeout_secs: i64,
    max_concurrent_sessions: usize,
}

/// Create a session bound to the caller's fingerprint headers
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    if payload.user_id.trim().is_empty() {
        return Err(GuardError::InvalidInput("user_id is required".into()).into());
    }

    let fp = fingerprint::from_headers(&headers);
    let digest = fingerprint::digest(&fp);
    let ip = client_ip(payload.ip, &headers);

    let session_id = state
        .sign_in(
            &payload.user_id,
            payload.identifier.as_deref(),
            payload.role,
            ip,
            fp,
        )
        .await?;

    let limits = state.sessions.limits();
    tracing::info!(
        session_id = %session_id,
        user_id = %payload.user_id,
        role = %payload.role,
        fingerprint = %digest,
        "Session created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            fingerprint: digest,
            idle_timeout_secs: limits.idle_timeout(payload.role).num_seconds(),
            max_concurrent_sessions: limits.max_concurrent_sessions(payload.role),
        }),
    ))
}

#[derive(Deserialize)]
pub struct ValidateSessionRequest {
    user_id: String,
}

/// Validate ownership, idle timeout and fingerprint
pub async fn validate_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ValidateSessionRequest>,
) -> (StatusCode, Json<SessionValidation>) {
    let fp = fingerprint::from_headers(&headers);
    let validation = state
        .sessions
        .validate_session(session_id, &payload.user_id, &fp)
        .await;

    let status = if validation.is_valid {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(validation))
}

/// Destroy a single session
pub async fn destroy_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.sessions.destroy_session(session_id).await {
        return Err(GuardError::NotFound(format!("session {session_id}")).into());
    }
    state.csrf.revoke(session_id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SignOutRequest {
    user_id: String,
}

#[derive(Serialize)]
pub struct SignOutResponse {
    success: bool,
    sessions_closed: usize,
}

/// Sign a user out everywhere
pub async fn sign_out(
    State(state): State<AppState>,
    Json(payload): Json<SignOutRequest>,
) -> Result<Json<SignOutResponse>, ApiError> {
    let sessions_closed = state.sign_out(&payload.user_id).await?;
    Ok(Json(SignOutResponse {
        success: true,
        sessions_closed,
    }))
}

#[derive(Deserialize)]
pub struct ClassifyRequest {
    message: String,
}

/// Map a raw auth backend message to a user-facing error
pub async fn classify_error(Json(payload): Json<ClassifyRequest>) -> Json<ClassifiedAuthError> {
    Json(auth_errors::classify(&payload.message))
}
