use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use job_common::events::EventBus;
use job_common::job::CreateJobOptions;
use job_common::queue::QueueBroker;
use job_common::service::JobService;
use job_common::store::JobStore;
use job_common::txn::TransactionCoordinator;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use tower::ServiceExt;

#[path = "../src/error.rs"]
mod error;
#[path = "../src/handlers/mod.rs"]
mod handlers;

fn build_router(pool: PgPool) -> Router {
    let recorder = PrometheusBuilder::new().build_recorder();
    let metrics_handle = recorder.handle();

    let store = JobStore::new(pool.clone());
    let broker = QueueBroker::new(pool.clone());
    let events = EventBus::new(16);
    let coordinator = TransactionCoordinator::new(pool.clone());
    let retry_policy = job_common::retry::RetryPolicy::build(1, std::time::Duration::from_secs(60)).provide();
    let service = JobService::new(store.clone(), broker.clone(), events, coordinator, retry_policy);

    let state = handlers::AppState {
        service,
        store,
        broker,
        default_max_retries: 3,
        history_page_limit: 50,
        health: health::HealthRegistry::new("job-service-test"),
    };

    handlers::app::add_routes(Router::new(), metrics_handle).with_state(state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[sqlx::test(migrations = "../migrations")]
async fn test_submit_returns_202_and_queued_job(pool: PgPool) {
    let app = build_router(pool);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/parsing")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"payload": {"recordId": "A", "fileType": "pdf"}}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    assert!(body["jobId"].as_str().unwrap().starts_with("parsing"));
}

#[sqlx::test(migrations = "../migrations")]
async fn test_result_before_completion_is_409(pool: PgPool) {
    let app = build_router(pool);

    let submit = Request::builder()
        .method("POST")
        .uri("/v1/parsing")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"payload": {}}).to_string()))
        .unwrap();

    let submit_response = app.clone().oneshot(submit).await.unwrap();
    let body = json_body(submit_response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let result_request = Request::builder()
        .uri(format!("/v1/parsing/{job_id}/result"))
        .body(Body::empty())
        .unwrap();

    let result_response = app.oneshot(result_request).await.unwrap();
    assert_eq!(result_response.status(), StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_cancel_then_result_stays_409(pool: PgPool) {
    let app = build_router(pool);

    let submit = Request::builder()
        .method("POST")
        .uri("/v1/parsing")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"payload": {}}).to_string()))
        .unwrap();

    let submit_response = app.clone().oneshot(submit).await.unwrap();
    let body = json_body(submit_response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let cancel_request = Request::builder()
        .method("POST")
        .uri(format!("/v1/parsing/{job_id}/cancel"))
        .body(Body::empty())
        .unwrap();

    let cancel_response = app.clone().oneshot(cancel_request).await.unwrap();
    assert_eq!(cancel_response.status(), StatusCode::OK);
    let cancelled = json_body(cancel_response).await;
    assert_eq!(cancelled["status"], "cancelled");

    // Idempotent re-cancel: still cancelled, not an error (§8).
    let second_cancel = Request::builder()
        .method("POST")
        .uri(format!("/v1/parsing/{job_id}/cancel"))
        .body(Body::empty())
        .unwrap();
    let second_response = app.oneshot(second_cancel).await.unwrap();
    assert_eq!(second_response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_unknown_domain_is_400(pool: PgPool) {
    let app = build_router(pool);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/not-a-real-domain")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"payload": {}}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_explicit_external_id_is_honored(pool: PgPool) {
    let app = build_router(pool.clone());

    let store = JobStore::new(pool);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/parsing")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"payload": {}, "externalId": "parsing_fixed_id"}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let job = store.find_by_external_id("parsing_fixed_id").await.unwrap();
    assert!(job.is_some());
}
