//! Health Monitor (§4.8): a passive, read-only observer. Never mutates
//! broker or job state; only samples and logs. Grounded on the shape of
//! `job_common::queue::QueueBroker::channel_depth` for the per-channel
//! numbers, extended with broker ping latency and process memory, which
//! the corpus has no retrieved example for (see DESIGN.md) so the RSS
//! read is authored directly against `/proc/self/status`, matching the
//! teacher's Linux-only deployment target.

use job_common::job::JobType;
use job_common::queue::{ChannelDepth, QueueBroker};

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct MemorySnapshot {
    pub rss_bytes: u64,
    pub limit_bytes: u64,
    pub percent_of_limit: f64,
}

/// One sample across every channel plus process memory, taken on an
/// interval by `run_loop` and never acted on beyond logging (§4.8:
/// "produces warnings, never acts").
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub broker_reachable: bool,
    pub ping_latency_ms: Option<f64>,
    pub channels: Vec<(JobType, ChannelDepth)>,
    pub memory: Option<MemorySnapshot>,
}

pub struct HealthMonitor {
    broker: QueueBroker,
    waiting_warn_threshold: i64,
    delayed_warn_threshold: i64,
    memory_rss_warn_bytes: u64,
    memory_limit_bytes: u64,
    memory_warn_percent: f64,
}

impl HealthMonitor {
    pub fn new(broker: QueueBroker, config: &Config) -> Self {
        Self {
            broker,
            waiting_warn_threshold: config.waiting_warn_threshold,
            delayed_warn_threshold: config.delayed_warn_threshold,
            memory_rss_warn_bytes: config.memory_rss_warn_bytes,
            memory_limit_bytes: config.memory_limit_bytes,
            memory_warn_percent: config.memory_warn_percent,
        }
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let (broker_reachable, ping_latency_ms) = match self.broker.ping().await {
            Ok(latency) => (true, Some(latency.as_secs_f64() * 1000.0)),
            Err(error) => {
                tracing::warn!(%error, "health monitor: broker unreachable");
                (false, None)
            }
        };

        let mut channels = Vec::with_capacity(JobType::ALL.len());
        for job_type in JobType::ALL {
            match self.broker.channel_depth(job_type).await {
                Ok(depth) => channels.push((job_type, depth)),
                Err(error) => {
                    tracing::warn!(channel = job_type.as_str(), %error, "health monitor: failed to read channel depth");
                }
            }
        }

        let memory = read_process_memory(self.memory_limit_bytes);

        HealthSnapshot { broker_reachable, ping_latency_ms, channels, memory }
    }

    /// Logs structured warnings for anything over threshold. Intentionally
    /// separate from `snapshot` so callers (and tests) can inspect a
    /// snapshot without depending on log output.
    pub fn warn_on_thresholds(&self, snapshot: &HealthSnapshot) {
        for (job_type, depth) in &snapshot.channels {
            if depth.waiting > self.waiting_warn_threshold {
                tracing::warn!(
                    channel = job_type.as_str(),
                    waiting = depth.waiting,
                    threshold = self.waiting_warn_threshold,
                    "channel waiting depth exceeds threshold"
                );
            }
            if depth.delayed > self.delayed_warn_threshold {
                tracing::warn!(
                    channel = job_type.as_str(),
                    delayed = depth.delayed,
                    threshold = self.delayed_warn_threshold,
                    "channel delayed depth exceeds threshold"
                );
            }
        }

        if let Some(memory) = snapshot.memory {
            if memory.rss_bytes > self.memory_rss_warn_bytes || memory.percent_of_limit > self.memory_warn_percent {
                tracing::warn!(
                    rss_bytes = memory.rss_bytes,
                    percent_of_limit = memory.percent_of_limit,
                    "process memory exceeds threshold"
                );
            }
        }
    }

    /// Runs `snapshot` + `warn_on_thresholds` on `interval` until the
    /// process exits. Never returns early: a single failed sample (e.g. a
    /// transient broker hiccup) is logged and the loop continues (§4.8:
    /// "passive, read-only").
    pub async fn run_loop(&self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot = self.snapshot().await;
            self.warn_on_thresholds(&snapshot);
        }
    }
}

/// Parses `VmRSS` out of `/proc/self/status` (Linux only). Returns `None`
/// on any other platform or if the file can't be read/parsed, matching
/// §4.8's "graceful `None` elsewhere" rather than failing the snapshot.
fn read_process_memory(limit_bytes: u64) -> Option<MemorySnapshot> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;

    let rss_kb: u64 = status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())?;

    let rss_bytes = rss_kb * 1024;
    let percent_of_limit = if limit_bytes > 0 {
        (rss_bytes as f64 / limit_bytes as f64) * 100.0
    } else {
        0.0
    };

    Some(MemorySnapshot { rss_bytes, limit_bytes, percent_of_limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_process_memory_returns_some_on_linux() {
        let snapshot = read_process_memory(2 * 1024 * 1024 * 1024);
        if cfg!(target_os = "linux") {
            let snapshot = snapshot.expect("this process has /proc/self/status on linux");
            assert!(snapshot.rss_bytes > 0);
        }
    }

    #[test]
    fn test_memory_percent_of_limit_computed_correctly() {
        let snapshot = MemorySnapshot {
            rss_bytes: 1024,
            limit_bytes: 2048,
            percent_of_limit: (1024_f64 / 2048_f64) * 100.0,
        };
        assert_eq!(snapshot.percent_of_limit, 50.0);
    }
}
