//! Exercises the worker-side lifecycle paths the error-classification and
//! state-machine fixes depend on (§8): a retryable failure that later
//! succeeds, a failure that exhausts its retry budget, and a cancellation
//! racing an in-flight attempt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use job_common::events::EventBus;
use job_common::job::{CreateJobOptions, JobStatus, JobType};
use job_common::queue::QueueBroker;
use job_common::service::JobService;
use job_common::store::JobStore;
use job_common::txn::TransactionCoordinator;
use job_common::domain::{DomainOutcome, DomainRequest, DomainService, ProgressReporter};
use job_common::error::{JobError, Kind};
use serde_json::Value;
use sqlx::PgPool;

#[path = "../src/processor.rs"]
mod processor;
#[path = "../src/runtime.rs"]
mod runtime;

use processor::{DomainProcessor, Processor};
use runtime::{ChannelConsumer, ConsumerConfig};

fn wiring(pool: PgPool) -> (JobService, QueueBroker) {
    let store = JobStore::new(pool.clone());
    let broker = QueueBroker::new(pool.clone());
    let events = EventBus::new(16);
    let coordinator = TransactionCoordinator::new(pool);
    // A near-zero base keeps retry delays effectively immediate in tests.
    let retry_policy = job_common::retry::RetryPolicy::build(0, Duration::from_secs(1)).provide();
    let service = JobService::new(store, broker.clone(), events, coordinator, retry_policy);
    (service, broker)
}

async fn test_liveness(name: &str) -> health::HealthHandle {
    health::HealthRegistry::new(name)
        .register("consumer".to_string(), time::Duration::seconds(30))
        .await
}

/// Fails the first attempt with a network-transient error, succeeds on
/// the second — the automatic-retry-then-success path (§8 scenario 3).
struct FlakyThenOk {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl DomainService for FlakyThenOk {
    async fn process(&self, request: DomainRequest, _progress: &dyn ProgressReporter) -> Result<DomainOutcome, JobError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Err(JobError::classify_domain_failure("ECONNRESET", None))
        } else {
            Ok(DomainOutcome { result: request.payload })
        }
    }
}

#[sqlx::test(migrations = "../migrations")]
async fn test_retryable_network_error_retries_then_completes(pool: PgPool) {
    let (service, broker) = wiring(pool);

    let job = service
        .create_job(
            JobType::Parsing,
            serde_json::json!({"recordId": "A"}),
            CreateJobOptions { max_retries: Some(2), ..Default::default() },
        )
        .await
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let domain = FlakyThenOk { attempts: attempts.clone() };
    let processor: Arc<dyn Processor> = Arc::new(DomainProcessor::new(domain, service.clone()));

    let consumer = Arc::new(ChannelConsumer::new(
        "test-worker",
        JobType::Parsing,
        broker,
        service.clone(),
        processor,
        ConsumerConfig {
            poll_interval: Duration::from_millis(10),
            lock_duration: Duration::from_secs(10),
            dequeue_batch_size: 10,
            max_concurrent_jobs: 4,
        },
        test_liveness("retry-test").await,
    ));

    let handle = tokio::spawn(consumer.run());

    let mut completed = false;
    for _ in 0..200 {
        let current = service.get_job(&job.external_id).await.unwrap();
        if current.status == JobStatus::Completed {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();

    assert!(completed, "job did not complete within the test window");
    let final_job = service.get_job(&job.external_id).await.unwrap();
    assert_eq!(final_job.status, JobStatus::Completed);
    assert_eq!(final_job.retry_count, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// Always fails with a retryable error; with a budget of 1 retry the job
/// must end up terminally `failed` and `on_final_failure` must fire
/// exactly once (§8 scenario 4).
struct AlwaysFails {
    final_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Processor for AlwaysFails {
    async fn execute(&self, _external_id: &str, _payload: &Value) -> Result<Value, JobError> {
        Err(JobError::new(Kind::Timeout, "request timeout waiting on upstream"))
    }

    async fn on_final_failure(&self, _external_id: &str, _payload: &Value, _error: &JobError) {
        self.final_failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[sqlx::test(migrations = "../migrations")]
async fn test_retries_exhausted_fails_terminally_and_invokes_final_failure_once(pool: PgPool) {
    let (service, broker) = wiring(pool);

    let job = service
        .create_job(
            JobType::Parsing,
            serde_json::json!({}),
            CreateJobOptions { max_retries: Some(1), ..Default::default() },
        )
        .await
        .unwrap();

    let final_failures = Arc::new(AtomicUsize::new(0));
    let processor: Arc<dyn Processor> = Arc::new(AlwaysFails { final_failures: final_failures.clone() });

    let consumer = Arc::new(ChannelConsumer::new(
        "test-worker",
        JobType::Parsing,
        broker,
        service.clone(),
        processor,
        ConsumerConfig {
            poll_interval: Duration::from_millis(10),
            lock_duration: Duration::from_secs(10),
            dequeue_batch_size: 10,
            max_concurrent_jobs: 4,
        },
        test_liveness("exhaust-test").await,
    ));

    let handle = tokio::spawn(consumer.run());

    let mut failed = false;
    for _ in 0..200 {
        let current = service.get_job(&job.external_id).await.unwrap();
        if current.status == JobStatus::Failed {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();

    assert!(failed, "job did not fail within the test window");
    let final_job = service.get_job(&job.external_id).await.unwrap();
    assert_eq!(final_job.status, JobStatus::Failed);
    assert_eq!(final_job.retry_count, 1);
    assert_eq!(final_failures.load(Ordering::SeqCst), 1);
}

/// Sleeps long enough for a cancellation to land mid-flight, then succeeds
/// — the worker's late completion must not resurrect an already-cancelled
/// job (§8 scenario 5, `TransitionOutcome::DroppedTerminal`).
struct SlowThenOk;

#[async_trait]
impl Processor for SlowThenOk {
    async fn execute(&self, _external_id: &str, _payload: &Value) -> Result<Value, JobError> {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(serde_json::json!({"ok": true}))
    }
}

#[sqlx::test(migrations = "../migrations")]
async fn test_cancel_mid_flight_is_not_overwritten_by_late_completion(pool: PgPool) {
    let (service, broker) = wiring(pool);

    let job = service
        .create_job(JobType::Parsing, serde_json::json!({}), CreateJobOptions::default())
        .await
        .unwrap();

    let processor: Arc<dyn Processor> = Arc::new(SlowThenOk);
    let consumer = Arc::new(ChannelConsumer::new(
        "test-worker",
        JobType::Parsing,
        broker,
        service.clone(),
        processor,
        ConsumerConfig {
            poll_interval: Duration::from_millis(10),
            lock_duration: Duration::from_secs(10),
            dequeue_batch_size: 10,
            max_concurrent_jobs: 4,
        },
        test_liveness("cancel-test").await,
    ));

    let handle = tokio::spawn(consumer.run());

    let mut processing = false;
    for _ in 0..100 {
        let current = service.get_job(&job.external_id).await.unwrap();
        if current.status == JobStatus::Processing {
            processing = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(processing, "job never reached processing before cancellation");

    let cancelled = service.cancel_job(&job.external_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    let cancel_time = cancelled.completed_at.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.abort();

    let final_job = service.get_job(&job.external_id).await.unwrap();
    assert_eq!(final_job.status, JobStatus::Cancelled);
    assert_eq!(final_job.completed_at.unwrap(), cancel_time);
}
