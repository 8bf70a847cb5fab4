//! CAPTCHA verification endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use crate::captcha::CaptchaOutcome;
use crate::routes::client_ip;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct VerifyRequest {
    /// Token produced by the CAPTCHA widget
    token: String,
    remote_ip: Option<String>,
}

/// Verify a widget token, retrying transient upstream failures
pub async fn verify_captcha(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyRequest>,
) -> (StatusCode, Json<CaptchaOutcome>) {
    let ip = client_ip(payload.remote_ip, &headers);
    let outcome = state.captcha.verify(&payload.token, ip.as_deref()).await;

    let status = if outcome.result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    tracing::debug!(
        success = outcome.result.success,
        attempts = outcome.attempts,
        "CAPTCHA verification finished"
    );

    (status, Json(outcome))
}
