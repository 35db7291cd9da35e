mod config;
mod handlers;
mod health_monitor;
mod sweeps;

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
use crate::health_monitor::HealthMonitor;

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
    let service = JobService::new(store.clone(), broker.clone(), events, coordinator, retry_policy);
    let webhook_store = WebhookStore::new(pool);

    let health = HealthRegistry::new("job-janitor");
    let cleanup_handle = health.register("sweep:cleanup".to_string(), time::Duration::seconds(30)).await;
    let stalled_handle = health.register("sweep:stalled_reclaim".to_string(), time::Duration::seconds(30)).await;
    let webhook_retry_handle = health.register("sweep:webhook_retry".to_string(), time::Duration::seconds(30)).await;
    let webhook_cleanup_handle = health.register("sweep:webhook_cleanup".to_string(), time::Duration::seconds(30)).await;
    let pending_reconcile_handle = health.register("sweep:pending_reconcile".to_string(), time::Duration::seconds(30)).await;
    let health_monitor_handle = health.register("health_monitor".to_string(), time::Duration::seconds(30)).await;

    let monitor = HealthMonitor::new(broker.clone(), &config);

    tokio::spawn(heartbeat_loop(
        sweeps::cleanup_loop(store, Duration::from_secs(config.cleanup_interval_secs), config.cleanup_age_days),
        cleanup_handle,
    ));
    tokio::spawn(heartbeat_loop(
        sweeps::stalled_reclaim_loop(broker.clone(), Duration::from_secs(config.stalled_reclaim_interval_secs)),
        stalled_handle,
    ));
    tokio::spawn(heartbeat_loop(
        sweeps::webhook_retry_loop(
            webhook_store.clone(),
            service.clone(),
            broker,
            Duration::from_secs(config.webhook_sweep_interval_secs),
        ),
        webhook_retry_handle,
    ));
    tokio::spawn(heartbeat_loop(
        sweeps::webhook_cleanup_loop(
            webhook_store,
            Duration::from_secs(config.cleanup_interval_secs),
            config.webhook_retention_days,
        ),
        webhook_cleanup_handle,
    ));
    tokio::spawn(heartbeat_loop(
        sweeps::pending_reconcile_loop(
            service,
            Duration::from_secs(config.pending_reconcile_interval_secs),
            Duration::from_secs(config.pending_reconcile_stale_after_secs),
        ),
        pending_reconcile_handle,
    ));
    tokio::spawn(health_monitor_loop(
        monitor,
        Duration::from_secs(config.health_snapshot_interval_secs),
        health_monitor_handle,
    ));

    let state = AppState { health };
    let router = handlers::app::add_routes(Router::new(), metrics_handle).with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "job-janitor listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Every sweep loop runs forever by design (§4.8: sweeps never terminate
/// on their own), so liveness is reported here rather than inside each
/// loop body, keeping `sweeps.rs` free of any health-registry dependency.
async fn heartbeat_loop(sweep: impl std::future::Future<Output = ()>, handle: health::HealthHandle) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            handle.report_healthy().await;
        }
    });
    sweep.await;
}

async fn health_monitor_loop(monitor: HealthMonitor, interval: Duration, handle: health::HealthHandle) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            handle.report_healthy().await;
        }
    });
    monitor.run_loop(interval).await;
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

    tracing::info!("shutdown signal received");
}
