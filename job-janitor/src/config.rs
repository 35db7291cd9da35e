//! Janitor process configuration (§9): one `envconfig`-derived struct
//! nesting the shared `KernelConfig`, plus the sweep intervals, retention
//! windows, and Health Monitor thresholds this process owns (§4.8).

use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kernel: job_common::config::KernelConfig,

    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8082")]
    pub bind_addr: String,

    #[envconfig(from = "CLEANUP_INTERVAL_SECS", default = "3600")]
    pub cleanup_interval_secs: u64,

    #[envconfig(from = "CLEANUP_AGE_DAYS", default = "30")]
    pub cleanup_age_days: i64,

    #[envconfig(from = "WEBHOOK_RETENTION_DAYS", default = "14")]
    pub webhook_retention_days: i64,

    #[envconfig(from = "WEBHOOK_SWEEP_INTERVAL_SECS", default = "15")]
    pub webhook_sweep_interval_secs: u64,

    #[envconfig(from = "STALLED_RECLAIM_INTERVAL_SECS", default = "30")]
    pub stalled_reclaim_interval_secs: u64,

    #[envconfig(from = "PENDING_RECONCILE_INTERVAL_SECS", default = "30")]
    pub pending_reconcile_interval_secs: u64,

    /// A Job must have been `pending` for at least this long before the
    /// reconcile sweep treats it as stuck rather than mid-flight of its
    /// own `create_job` enqueue call.
    #[envconfig(from = "PENDING_RECONCILE_STALE_AFTER_SECS", default = "60")]
    pub pending_reconcile_stale_after_secs: u64,

    #[envconfig(from = "HEALTH_SNAPSHOT_INTERVAL_SECS", default = "15")]
    pub health_snapshot_interval_secs: u64,

    /// Channel depth above which a `waiting` warning fires (§4.8: "waiting
    /// depth > 1000").
    #[envconfig(from = "HEALTH_WAITING_WARN_THRESHOLD", default = "1000")]
    pub waiting_warn_threshold: i64,

    /// Channel depth above which a `delayed` warning fires (§4.8: "delayed
    /// depth > 500").
    #[envconfig(from = "HEALTH_DELAYED_WARN_THRESHOLD", default = "500")]
    pub delayed_warn_threshold: i64,

    /// Process RSS, in bytes, above which a memory warning fires regardless
    /// of `heap_limit_bytes` (§4.8: "RSS > 2GiB").
    #[envconfig(from = "HEALTH_MEMORY_RSS_WARN_BYTES", default = "2147483648")]
    pub memory_rss_warn_bytes: u64,

    /// The deployment's configured heap/container memory limit, used to
    /// compute the memory percentage warning (§4.8: "memory > 85% of heap
    /// limit"). Defaults to 2GiB when the deployment doesn't set one.
    #[envconfig(from = "HEALTH_MEMORY_LIMIT_BYTES", default = "2147483648")]
    pub memory_limit_bytes: u64,

    #[envconfig(from = "HEALTH_MEMORY_WARN_PERCENT", default = "85.0")]
    pub memory_warn_percent: f64,
}
