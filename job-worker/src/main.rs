mod config;
mod error;
mod processor;
mod runtime;
mod safe_resolver;
mod util;
mod webhook_dispatcher;

use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use health::HealthRegistry;
use job_common::domain::EchoDomainService;
use job_common::events::EventBus;
use job_common::job::JobType;
use job_common::queue::QueueBroker;
use job_common::service::JobService;
use job_common::store::JobStore;
use job_common::txn::TransactionCoordinator;
use job_common::webhook_store::WebhookStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::processor::{DomainProcessor, Processor};
use crate::runtime::{ChannelConsumer, ConsumerConfig, WorkerRuntime};
use crate::safe_resolver::SafeResolver;
use crate::webhook_dispatcher::WebhookDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::init_from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.kernel.database_max_connections)
        .connect(&config.kernel.database_url)
        .await?;

    PrometheusBuilder::new().install_recorder()?;

    let store = JobStore::new(pool.clone());
    let broker = QueueBroker::new(pool.clone());
    let events = EventBus::new(config.kernel.event_bus_capacity);
    let coordinator = TransactionCoordinator::new(pool.clone());
    let retry_policy = config.kernel.retry_policy();
    let service = JobService::new(store, broker.clone(), events.clone(), coordinator, retry_policy.clone());
    let webhook_store = WebhookStore::new(pool);

    // Completions/failures observed by this worker's own consumers (parsing,
    // enhancement, ...) fan out to webhook_delivery jobs here too.
    job_common::webhook_trigger::spawn(events, webhook_store.clone(), service.clone());

    let health = HealthRegistry::new(&config.worker_name);

    let http_client = reqwest::Client::builder()
        .dns_resolver(Arc::new(SafeResolver::new()))
        .user_agent("job-worker")
        .timeout(Duration::from_secs(config.webhook_request_timeout_secs))
        .build()?;

    let consumer_config = ConsumerConfig {
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        lock_duration: Duration::from_secs(config.lock_duration_secs),
        dequeue_batch_size: config.dequeue_batch_size,
        max_concurrent_jobs: config.max_concurrent_jobs_per_channel,
    };

    let domain_channels = [
        (JobType::Parsing, "parsing"),
        (JobType::Enhancement, "enhancement"),
        (JobType::Evaluation, "evaluation"),
        (JobType::Generation, "generation"),
    ];

    let mut consumers = Vec::with_capacity(domain_channels.len() + 1);

    for (job_type, channel) in domain_channels {
        let handle = health
            .register(format!("consumer:{channel}"), time::Duration::seconds(30))
            .await;
        let processor: Arc<dyn Processor> =
            Arc::new(DomainProcessor::new(EchoDomainService { channel }, service.clone()));

        consumers.push(Arc::new(ChannelConsumer::new(
            config.worker_name.clone(),
            job_type,
            broker.clone(),
            service.clone(),
            processor,
            consumer_config,
            handle,
        )));
    }

    let webhook_handle = health
        .register("consumer:webhook_delivery".to_string(), time::Duration::seconds(30))
        .await;
    let webhook_processor: Arc<dyn Processor> = Arc::new(WebhookDispatcher::new(
        http_client,
        webhook_store,
        retry_policy,
    ));
    consumers.push(Arc::new(ChannelConsumer::new(
        config.worker_name.clone(),
        JobType::WebhookDelivery,
        broker,
        service,
        webhook_processor,
        consumer_config,
        webhook_handle,
    )));

    tracing::info!(worker = %config.worker_name, channels = consumers.len(), "job-worker starting");

    let runtime = WorkerRuntime::new(consumers);
    let grace_period = Duration::from_secs(config.shutdown_grace_period_secs);
    let drained = runtime.run(shutdown_signal(), grace_period).await;

    if !drained {
        tracing::error!("shutdown grace period exceeded, exiting non-zero");
        std::process::exit(1);
    }

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
}
