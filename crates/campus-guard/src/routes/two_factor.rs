//! Two-factor code endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::routes::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendRequest {
    user_id: String,
}

#[derive(Serialize)]
pub struct SendResponse {
    success: bool,
    /// Countdown shown next to the code input
    expires_in_secs: u64,
}

/// Send (or resend) a code to the user
pub async fn send_code(
    State(state): State<AppState>,
    Json(payload): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let expires_in_secs = state.two_factor.send_code(&payload.user_id).await?;
    Ok(Json(SendResponse {
        success: true,
        expires_in_secs,
    }))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    user_id: String,
    code: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in_secs: Option<u64>,
}

/// Check a submitted code
pub async fn verify_code(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<(StatusCode, Json<VerifyResponse>), ApiError> {
    let verified = state
        .two_factor
        .verify_code(&payload.user_id, &payload.code)
        .await?;

    if verified {
        return Ok((
            StatusCode::OK,
            Json(VerifyResponse {
                verified,
                expires_in_secs: None,
            }),
        ));
    }

    let expires_in_secs = state
        .two_factor
        .seconds_remaining_at(&payload.user_id, Utc::now())
        .await;
    Ok((
        StatusCode::UNAUTHORIZED,
        Json(VerifyResponse {
            verified,
            expires_in_secs,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::routes::{create_router, test_util::{body_json, json_request}};
    use crate::state::test_support::test_state;
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_send_then_verify() {
        let (state, outbox) = test_state();
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/2fa/send", json!({ "user_id": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["expires_in_secs"], 600);

        // Immediate resend hits the cooldown
        let response = app
            .clone()
            .oneshot(json_request("POST", "/2fa/send", json!({ "user_id": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let code = outbox.sent.lock().await[0].1.clone();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let response = app
            .clone()
            .oneshot(json_request("POST", "/2fa/verify", json!({ "user_id": "u1", "code": wrong })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["verified"], false);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/2fa/verify", json!({ "user_id": "u1", "code": code })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["verified"], true);

        // Consumed
        let response = app
            .oneshot(json_request("POST", "/2fa/verify", json!({ "user_id": "u1", "code": code })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_code() {
        let (state, _) = test_state();
        let response = create_router(state)
            .oneshot(json_request("POST", "/2fa/verify", json!({ "user_id": "u1", "code": "12ab" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
