use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{healthz, AppState};

pub fn add_routes(router: Router<AppState>, metrics_handle: PrometheusHandle) -> Router<AppState> {
    router
        .route("/", routing::get(healthz::index))
        .route("/_readiness", routing::get(healthz::readiness))
        .route("/_liveness", routing::get(healthz::liveness))
        .route("/metrics", routing::get(move || async move { metrics_handle.render() }))
}
