//! CSRF token endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campus_common::GuardError;
use campus_common::constants::headers::X_CSRF_TOKEN;
use crate::routes::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IssueRequest {
    session_id: Uuid,
}

#[derive(Serialize)]
pub struct IssueResponse {
    token: String,
    expires_in_secs: u64,
}

/// Issue a token for a live session
pub async fn issue_token(
    State(state): State<AppState>,
    Json(payload): Json<IssueRequest>,
) -> Result<Json<IssueResponse>, ApiError> {
    if !state.sessions.contains(payload.session_id).await {
        return Err(GuardError::NotFound(format!("session {}", payload.session_id)).into());
    }

    let token = state.csrf.issue(payload.session_id).await;
    Ok(Json(IssueResponse {
        token,
        expires_in_secs: state.config.csrf.token_ttl_secs,
    }))
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    session_id: Uuid,
    /// Token from the form body; the X-CSRF-Token header is used when absent
    token: Option<String>,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    valid: bool,
}

pub async fn validate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ValidateRequest>,
) -> (StatusCode, Json<ValidateResponse>) {
    let token = payload.token.or_else(|| {
        headers
            .get(X_CSRF_TOKEN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let valid = match token {
        Some(token) => state.csrf.validate(payload.session_id, &token).await,
        None => false,
    };

    let status = if valid {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    (status, Json(ValidateResponse { valid }))
}

#[cfg(test)]
mod tests {
    use crate::routes::{create_router, test_util::{body_json, json_request}};
    use crate::state::test_support::test_state;
    use axum::http::StatusCode;
    use campus_common::{Fingerprint, Role};
    use serde_json::json;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_issue_requires_live_session() {
        let (state, _) = test_state();
        let response = create_router(state)
            .oneshot(json_request(
                "POST",
                "/csrf/token",
                json!({ "session_id": Uuid::new_v4() }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_token_via_header() {
        let (state, _) = test_state();
        let session_id = state
            .sessions
            .create_secure_session("u1", Role::Student, None, Fingerprint::default())
            .await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/csrf/token", json!({ "session_id": session_id })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let token = body_json(response).await["token"].as_str().unwrap().to_string();

        let mut request = json_request("POST", "/csrf/validate", json!({ "session_id": session_id }));
        request
            .headers_mut()
            .insert("x-csrf-token", token.parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["valid"], true);

        let response = app
            .oneshot(json_request(
                "POST",
                "/csrf/validate",
                json!({ "session_id": session_id, "token": "forged" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
