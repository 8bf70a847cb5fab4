//! Rate limit check endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use campus_common::{ActionKind, Role};
use crate::routes::{ApiError, client_ip};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CheckRequest {
    /// User id or email being limited
    identifier: String,
    action: ActionKind,
    #[serde(default)]
    role: Role,
    /// Client IP; falls back to X-Forwarded-For
    ip: Option<String>,
}

/// Check and record one request against the role × action rule
pub async fn check_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    if payload.identifier.trim().is_empty() {
        return Err(campus_common::GuardError::InvalidInput("identifier is required".into()).into());
    }

    let ip = client_ip(payload.ip, &headers);
    let decision = state
        .rate_limiter
        .check_limit(&payload.identifier, payload.action, payload.role, ip.as_deref())
        .await?;

    if decision.allowed {
        return Ok(Json(decision).into_response());
    }

    let retry_after = decision.retry_after.unwrap_or(1);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(decision)).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    Ok(response)
}
