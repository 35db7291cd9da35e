//! Worker Runtime (§4.4): one consumer loop per channel, each bound to a
//! `JobType` with its own concurrency cap. Grounded directly on
//! `hook-worker::worker::WebhookWorker` (`wait_for_jobs_tx`'s polling loop
//! reporting liveness on each tick, semaphore-bounded concurrent task
//! spawning), generalized from a single hard-coded webhook queue to any
//! channel + `Processor`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use health::HealthHandle;
use job_common::job::{Job, JobStatus, JobType};
use job_common::queue::{DequeueOptions, QueueBroker};
use job_common::service::JobService;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::processor::Processor;

#[derive(Debug, Clone, Copy)]
pub struct ConsumerConfig {
    pub poll_interval: Duration,
    pub lock_duration: Duration,
    pub dequeue_batch_size: u32,
    pub max_concurrent_jobs: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            lock_duration: Duration::from_secs(60),
            dequeue_batch_size: 10,
            max_concurrent_jobs: 10,
        }
    }
}

/// A single channel's consumer loop. One of these runs per `JobType` (§4.4
/// "host process that runs N consumers concurrently, each bound to a
/// specific channel").
pub struct ChannelConsumer {
    worker_name: String,
    job_type: JobType,
    broker: QueueBroker,
    service: JobService,
    processor: Arc<dyn Processor>,
    config: ConsumerConfig,
    liveness: HealthHandle,
    /// Per-process, per-external-id mutex (§5: "prevents the same Job
    /// being processed twice concurrently within one worker").
    in_flight: Arc<DashMap<String, ()>>,
}

impl ChannelConsumer {
    pub fn new(
        worker_name: impl Into<String>,
        job_type: JobType,
        broker: QueueBroker,
        service: JobService,
        processor: Arc<dyn Processor>,
        config: ConsumerConfig,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            job_type,
            broker,
            service,
            processor,
            config,
            liveness,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    async fn wait_for_jobs(&self) -> Vec<Job> {
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            if !self.broker.check_rate_limit(self.job_type) {
                continue;
            }

            let options = DequeueOptions {
                lock_duration: self.config.lock_duration,
                limit: self.config.dequeue_batch_size,
            };

            match self.broker.dequeue(&self.worker_name, self.job_type, options).await {
                Ok(jobs) if !jobs.is_empty() => return jobs,
                Ok(_) => continue,
                Err(error) => {
                    error!(channel = self.job_type.as_str(), %error, "error while dequeuing jobs");
                    continue;
                }
            }
        }
    }

    /// Runs this consumer forever. Cancel-safe: dropping the future mid
    /// iteration abandons in-flight tasks, which is acceptable since the
    /// broker lock (`lock_duration`) makes them re-deliverable.
    pub async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));

        loop {
            let report_saturation = || {
                metrics::gauge!("job_worker_saturation_percent", "channel" => self.job_type.as_str())
                    .set(1f64 - semaphore.available_permits() as f64 / self.config.max_concurrent_jobs as f64);
            };
            report_saturation();

            let jobs = self.wait_for_jobs().await;
            metrics::histogram!("job_dequeue_batch_size", "channel" => self.job_type.as_str())
                .record(jobs.len() as f64);

            for job in jobs {
                if self.in_flight.insert(job.external_id.clone(), ()).is_some() {
                    continue;
                }

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore has been closed");
                let this = self.clone();

                tokio::spawn(async move {
                    let external_id = job.external_id.clone();
                    this.process_one(job).await;
                    this.in_flight.remove(&external_id);
                    drop(permit);
                });
            }
        }
    }

    async fn process_one(&self, job: Job) {
        let labels = [("channel", self.job_type.as_str())];
        metrics::counter!("job_processed_total", &labels).increment(1);

        let started = Instant::now();
        let result = self.processor.execute(&job.external_id, &job.payload).await;
        let elapsed = started.elapsed().as_secs_f64();

        let is_final_failure = matches!(&result, Err(error) if !(error.is_retryable() && job.has_retries_remaining()));

        if let Err(error) = &result {
            if is_final_failure {
                error.mark_logged_if_new();
                self.processor.on_final_failure(&job.external_id, &job.payload, error).await;
            }
        }

        match self.service.process_job_result(&job.external_id, result).await {
            Ok(updated) => {
                metrics::histogram!("job_processing_duration_seconds", &labels).record(elapsed);
                if updated.status == JobStatus::Failed {
                    metrics::counter!("job_failed_total", &labels).increment(1);
                } else if updated.status == JobStatus::Completed {
                    metrics::counter!("job_completed_total", &labels).increment(1);
                }
            }
            Err(error) => {
                warn!(external_id = %job.external_id, %error, "failed to record job result");
            }
        }
    }
}

/// The host process: owns one `ChannelConsumer` per registered `JobType`
/// and runs them all concurrently until shutdown.
pub struct WorkerRuntime {
    consumers: Vec<Arc<ChannelConsumer>>,
}

impl WorkerRuntime {
    pub fn new(consumers: Vec<Arc<ChannelConsumer>>) -> Self {
        Self { consumers }
    }

    /// Spawns every consumer and waits on `shutdown`. A graceful shutdown
    /// signal aborts the consumer tasks and returns once outstanding work
    /// drains or `grace_period` elapses (§4.4: "waits up to a bounded grace
    /// period; if exceeded, the process exits non-zero").
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>, grace_period: Duration) -> bool {
        let handles: Vec<_> = self
            .consumers
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run()))
            .collect();

        shutdown.await;
        tracing::info!("shutdown signal received, draining consumers");

        let drain = async {
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                let _ = handle.await;
            }
        };

        tokio::time::timeout(grace_period, drain).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_defaults_are_sane() {
        let config = ConsumerConfig::default();
        assert!(config.max_concurrent_jobs > 0);
        assert!(config.lock_duration > config.poll_interval);
    }
}
