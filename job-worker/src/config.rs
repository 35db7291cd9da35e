//! Worker process configuration (§9): one `envconfig`-derived struct
//! nesting the shared `KernelConfig`, plus per-channel concurrency and
//! outbound HTTP timeouts specific to the Worker Runtime.

use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kernel: job_common::config::KernelConfig,

    #[envconfig(from = "WORKER_NAME", default = "job-worker")]
    pub worker_name: String,

    #[envconfig(from = "POLL_INTERVAL_MS", default = "200")]
    pub poll_interval_ms: u64,

    #[envconfig(from = "LOCK_DURATION_SECS", default = "60")]
    pub lock_duration_secs: u64,

    #[envconfig(from = "DEQUEUE_BATCH_SIZE", default = "10")]
    pub dequeue_batch_size: u32,

    #[envconfig(from = "MAX_CONCURRENT_JOBS_PER_CHANNEL", default = "10")]
    pub max_concurrent_jobs_per_channel: usize,

    #[envconfig(from = "WEBHOOK_REQUEST_TIMEOUT_SECS", default = "10")]
    pub webhook_request_timeout_secs: u64,

    #[envconfig(from = "SHUTDOWN_GRACE_PERIOD_SECS", default = "30")]
    pub shutdown_grace_period_secs: u64,
}
