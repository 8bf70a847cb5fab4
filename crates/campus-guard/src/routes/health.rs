//! Health check endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use campus_common::MetricsSnapshot;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    storage: &'static str,
}

/// Readiness check (is the record store reachable?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let storage = state.rate_limiter.store_backend();

    if check_redis(&state).await {
        Ok(Json(ReadyResponse {
            status: "ready",
            storage,
        }))
    } else {
        // Return 503 if not ready
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn check_redis(state: &AppState) -> bool {
    let Some(ref redis) = state.redis else {
        return true;
    };
    let mut conn = redis.clone();
    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    result.is_ok()
}

#[derive(Serialize)]
pub struct MetricsResponse {
    uptime_secs: u64,
    #[serde(flatten)]
    snapshot: MetricsSnapshot,
}

/// Metrics endpoint (for monitoring)
pub async fn metrics(
    State(state): State<AppState>,
) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        uptime_secs: state.uptime_secs(),
        snapshot: state.metrics().await,
    })
}
