//! Readiness/liveness probes, grounded on the teacher's
//! `hook-api::handlers::app::add_routes` (`/_readiness`, `/_liveness`).

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::handlers::AppState;

pub async fn index() -> &'static str {
    "job-service"
}

pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<health::Status>) {
    let status = state.health.get_status().await;
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

pub async fn liveness() -> &'static str {
    "ok"
}
