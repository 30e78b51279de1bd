//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Detailed health information as JSON.
///
/// Always 200; the `state` field tells "up but draining" from "ready".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();

    Json(json!({
        "state": health.as_str(),
        "pending_calls": state.service.pending_count(),
        "subscribers": state.service.hub().subscriber_count(),
        "dropped_events": state.service.hub().dropped_count(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness check: 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: 200 only in the `ready` state.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.is_accepting() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
