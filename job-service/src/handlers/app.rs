use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{healthz, jobs, AppState};

pub fn add_routes(router: Router<AppState>, metrics_handle: PrometheusHandle) -> Router<AppState> {
    router
        .route("/", routing::get(healthz::index))
        .route("/_readiness", routing::get(healthz::readiness))
        .route("/_liveness", routing::get(healthz::liveness))
        .route("/metrics", routing::get(move || async move { metrics_handle.render() }))
        .route("/v1/:domain", routing::post(jobs::submit))
        .route("/v1/:domain/history", routing::get(jobs::history))
        .route("/v1/:domain/stats", routing::get(jobs::stats))
        .route("/v1/:domain/:job_id", routing::get(jobs::status))
        .route("/v1/:domain/:job_id/result", routing::get(jobs::result))
        .route("/v1/:domain/:job_id/cancel", routing::post(jobs::cancel))
        .route("/v1/:domain/:job_id/retry", routing::post(jobs::retry))
}
