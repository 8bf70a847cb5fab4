//! Debug panel endpoints: security events, sessions and rate limit records.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use campus_common::{
    ActionKind, GuardError, RateLimitRecord, SecurityEvent, SecurityEventKind, SecuritySession,
};
use campus_common::constants::SECURITY_LOG_CAPACITY;
use crate::routes::ApiError;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/security-events", get(list_events).delete(clear_events))
        .route("/sessions/{user_id}", get(user_sessions))
        .route("/rate-limit/{action}/{identifier}", get(rate_limit_record))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    limit: Option<usize>,
    kind: Option<SecurityEventKind>,
}

#[derive(Serialize)]
pub struct EventsResponse {
    total_recorded: u64,
    suspicious: usize,
    events: Vec<SecurityEvent>,
}

/// Most recent events, newest first, optionally filtered by kind
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let limit = params.limit.unwrap_or(SECURITY_LOG_CAPACITY);
    let mut events = state.events.recent(SECURITY_LOG_CAPACITY).await;
    if let Some(kind) = params.kind {
        events.retain(|e| e.kind == kind);
    }
    let suspicious = events.iter().filter(|e| e.kind.is_suspicious()).count();
    events.truncate(limit);

    Json(EventsResponse {
        total_recorded: state.events.total_recorded(),
        suspicious,
        events,
    })
}

async fn clear_events(State(state): State<AppState>) -> StatusCode {
    state.events.clear().await;
    tracing::info!("Security event log cleared");
    StatusCode::NO_CONTENT
}

async fn user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<SecuritySession>> {
    Json(state.sessions.active_sessions(&user_id).await)
}

async fn rate_limit_record(
    State(state): State<AppState>,
    Path((action, identifier)): Path<(ActionKind, String)>,
) -> Result<Json<RateLimitRecord>, ApiError> {
    state
        .rate_limiter
        .record(&identifier, action)
        .await?
        .map(Json)
        .ok_or_else(|| GuardError::NotFound(format!("no {action} record for {identifier}")).into())
}

#[cfg(test)]
mod tests {
    use crate::routes::{create_router, test_util::body_json};
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use campus_common::{ActionKind, Role, SecurityEventKind};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_events_listing_and_clear() {
        let (state, _) = test_state();
        for _ in 0..3 {
            state
                .rate_limiter
                .check_limit("x@campus.edu", ActionKind::Auth, Role::Anonymous, None)
                .await
                .unwrap();
        }
        state
            .events
            .record(SecurityEventKind::SignOut, Some("u1"), "signed out")
            .await;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::get("/admin/security-events?kind=rate_limit_exceeded")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["events"].as_array().unwrap().len(), 1);
        assert_eq!(json["suspicious"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::get("/admin/rate-limit/auth/x@campus.edu")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["violation_count"], 1);

        let response = app
            .oneshot(
                Request::delete("/admin/security-events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.events.len().await, 0);
    }
}
