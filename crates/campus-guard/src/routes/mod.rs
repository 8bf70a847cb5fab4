//! HTTP route handlers for Campus Guard.

use axum::{
    Json, Router,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use campus_common::GuardError;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod admin;
mod captcha;
mod csrf;
mod health;
mod rate_limit;
mod sessions;
mod two_factor;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/metrics", get(health::metrics))

        // Rate limiting
        .route("/rate-limit/check", post(rate_limit::check_limit))

        // CAPTCHA
        .route("/captcha/verify", post(captcha::verify_captcha))

        // Sessions & sign-out
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/{session_id}", delete(sessions::destroy_session))
        .route("/sessions/{session_id}/validate", post(sessions::validate_session))
        .route("/auth/sign-out", post(sessions::sign_out))
        .route("/auth/classify-error", post(sessions::classify_error))

        // CSRF
        .route("/csrf/token", post(csrf::issue_token))
        .route("/csrf/validate", post(csrf::validate_token))

        // Two-factor
        .route("/2fa/send", post(two_factor::send_code))
        .route("/2fa/verify", post(two_factor::verify_code))

        // Admin endpoints (debug panel)
        .nest("/admin", admin::admin_routes())

        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())

        // Add shared state
        .with_state(state)
}

/// Same-origin only unless origins are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT_LANGUAGE,
            header::HeaderName::from_static("x-client-timezone"),
            header::HeaderName::from_static("x-client-platform"),
            header::HeaderName::from_static("x-screen-resolution"),
            header::HeaderName::from_static("x-csrf-token"),
        ]);

    if origins.is_empty() {
        cors
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError(GuardError);

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self.0 {
            GuardError::Internal(msg) | GuardError::Redis(msg) | GuardError::Config(msg) => {
                // Log the real error server-side, return generic message to client
                tracing::error!(error = %msg, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            success: false,
            error: message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<GuardError> for ApiError {
    fn from(e: GuardError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(GuardError::Internal(format!("{e:#}")))
    }
}

/// Client IP from the request body, else the first X-Forwarded-For hop
pub(crate) fn client_ip(explicit: Option<String>, headers: &HeaderMap) -> Option<String> {
    explicit.filter(|ip| !ip.is_empty()).or_else(|| {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
