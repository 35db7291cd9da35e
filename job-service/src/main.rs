mod config;
mod error;
mod handlers;

use std::time::Duration;

use axum::Router;
use envconfig::Envconfig;
use health::HealthRegistry;
use job_common::events::EventBus;
use job_common::queue::QueueBroker;
use job_common::service::JobService;
use job_common::store::JobStore;
use job_common::txn::TransactionCoordinator;
use job_common::webhook_store::WebhookStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::handlers::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::init_from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.kernel.database_max_connections)
        .connect(&config.kernel.database_url)
        .await?;

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let store = JobStore::new(pool.clone());
    let broker = QueueBroker::new(pool.clone());
    let events = EventBus::new(config.kernel.event_bus_capacity);
    let coordinator = TransactionCoordinator::new(pool.clone());
    let retry_policy = config.kernel.retry_policy();
    let service = JobService::new(store.clone(), broker.clone(), events.clone(), coordinator, retry_policy);

    // Job submissions made directly through the API (job.created) still need
    // to fan out to subscribers without waiting on job-worker's event bus.
    let webhook_store = WebhookStore::new(pool);
    job_common::webhook_trigger::spawn(events, webhook_store, service.clone());

    let health = HealthRegistry::new("job-service");
    let handle = health.register("http".to_string(), time::Duration::seconds(30)).await;
    handle.report_healthy().await;

    let state = AppState {
        service,
        store,
        broker,
        default_max_retries: config.default_max_retries,
        history_page_limit: config.history_page_limit,
        health,
    };

    let router = handlers::app::add_routes(Router::new(), metrics_handle).with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "job-service listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, waiting for in-flight requests to drain");
    tokio::time::sleep(Duration::from_millis(50)).await;
}
