//! Queue Broker (§4.3): a priority queue layered on the same Postgres
//! table as the Job Store, using the teacher's `FOR UPDATE SKIP LOCKED`
//! dequeue pattern (`hook-common::pgqueue::PgQueue::dequeue_tx`)
//! generalized from one queue name to one channel per `JobType`, with
//! delayed visibility, lock-duration based re-delivery, and per-channel
//! consumer rate limiting via `governor` (already in the corpus's
//! dependency table for exactly this purpose).

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use sqlx::PgPool;

use crate::error::{JobError, Kind};
use crate::job::{Job, JobStatus, JobType, Priority};

type Limiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

struct Inner {
    pool: PgPool,
    limiters: DashMap<JobType, Limiter>,
    max_stalled_count: i32,
}

/// A durable, multi-channel priority queue. Holds one rate limiter per
/// `JobType` channel, constructed lazily on first configuration. Cheap to
/// clone: every clone shares the same pool and limiter map, the same way
/// the teacher's `PgQueue` is handed around by value to every consumer.
#[derive(Clone)]
pub struct QueueBroker {
    inner: std::sync::Arc<Inner>,
}

#[derive(Debug, Clone, Copy)]
pub struct DequeueOptions {
    pub lock_duration: Duration,
    pub limit: u32,
}

impl QueueBroker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                pool,
                limiters: DashMap::new(),
                max_stalled_count: 3,
            }),
        }
    }

    fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Configure a per-channel rate limit (jobs/second). Channels without
    /// an explicit limit are unthrottled.
    pub fn set_channel_rate_limit(&self, job_type: JobType, per_second: NonZeroU32) {
        let limiter = RateLimiter::direct(Quota::per_second(per_second));
        self.inner.limiters.insert(job_type, limiter);
    }

    /// Best-effort token check; channels with no configured limiter always
    /// allow. Consumers call this before issuing a dequeue.
    pub fn check_rate_limit(&self, job_type: JobType) -> bool {
        match self.inner.limiters.get(&job_type) {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Make a `pending` job visible to workers: `queued` status,
    /// `scheduled_at` honoring `delay_ms`. DB visibility always precedes
    /// this call (§5 "Critical ordering rule"): the caller must have
    /// already committed the Job Store insert.
    pub async fn enqueue(
        &self,
        external_id: &str,
        delay_ms: i64,
    ) -> Result<Option<Job>, JobError> {
        sqlx::query_as::<_, Job>(
            r#"
UPDATE jobs
SET
    status = 'queued'::job_status,
    scheduled_at = NOW() + make_interval(secs => $2 / 1000.0),
    updated_at = NOW()
WHERE external_id = $1
RETURNING *
            "#,
        )
        .bind(external_id)
        .bind(delay_ms)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))
    }

    /// Dequeue up to `limit` jobs of `job_type`, marking them `processing`
    /// and locking them for `lock_duration`. Priority ordering is
    /// best-effort within the channel (§4.3).
    pub async fn dequeue(
        &self,
        worker_name: &str,
        job_type: JobType,
        options: DequeueOptions,
    ) -> Result<Vec<Job>, JobError> {
        let lock_secs = options.lock_duration.as_secs_f64();

        sqlx::query_as::<_, Job>(
            r#"
WITH available AS (
    SELECT id
    FROM jobs
    WHERE job_type = $1
      AND status = 'queued'
      AND scheduled_at <= NOW()
    ORDER BY priority DESC, scheduled_at
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
UPDATE jobs
SET
    status = 'processing'::job_status,
    started_at = COALESCE(started_at, NOW()),
    locked_until = NOW() + make_interval(secs => $3),
    attempted_by = array_append(attempted_by, $4::text),
    updated_at = NOW()
FROM available
WHERE jobs.id = available.id
RETURNING jobs.*
            "#,
        )
        .bind(job_type)
        .bind(options.limit as i64)
        .bind(lock_secs)
        .bind(worker_name)
        .fetch_all(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))
    }

    /// Best-effort removal of a still-queued entry (§4.3: "may silently
    /// miss entries already in-flight"). Returns `true` if a queued row
    /// was found and pulled out before a worker could claim it.
    pub async fn remove_if_queued(&self, external_id: &str) -> Result<bool, JobError> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET status = 'cancelled'::job_status, completed_at = NOW(), updated_at = NOW()
WHERE external_id = $1 AND status = 'queued'
            "#,
        )
        .bind(external_id)
        .execute(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Reclaim entries whose lock has expired without an ack/nack,
    /// re-delivering them up to `maxStalledCount` and failing them beyond
    /// that (§4.3).
    pub async fn reclaim_stalled(&self) -> Result<u64, JobError> {
        let requeued = sqlx::query(
            r#"
UPDATE jobs
SET
    status = 'queued'::job_status,
    stalled_count = stalled_count + 1,
    locked_until = NULL,
    updated_at = NOW()
WHERE status = 'processing'
  AND locked_until IS NOT NULL
  AND locked_until < NOW()
  AND stalled_count < $1
            "#,
        )
        .bind(self.inner.max_stalled_count)
        .execute(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))?
        .rows_affected();

        let failed = sqlx::query(
            r#"
UPDATE jobs
SET
    status = 'failed'::job_status,
    completed_at = NOW(),
    updated_at = NOW(),
    error = jsonb_build_object('kind', 'unknown', 'message', 'exceeded max stalled redelivery count')
WHERE status = 'processing'
  AND locked_until IS NOT NULL
  AND locked_until < NOW()
  AND stalled_count >= $1
            "#,
        )
        .bind(self.inner.max_stalled_count)
        .execute(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))?
        .rows_affected();

        Ok(requeued + failed)
    }

    /// Refresh the lock on a still-running job, used by long-running
    /// processors to extend their hold past the original `lockDuration`
    /// (§4.4: "Workers must periodically refresh broker locks").
    pub async fn extend_lock(
        &self,
        external_id: &str,
        lock_duration: Duration,
    ) -> Result<(), JobError> {
        sqlx::query(
            r#"
UPDATE jobs
SET locked_until = NOW() + make_interval(secs => $2)
WHERE external_id = $1 AND status = 'processing'
            "#,
        )
        .bind(external_id)
        .bind(lock_duration.as_secs_f64())
        .execute(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))?;

        Ok(())
    }

    /// Round-trips a trivial query to measure broker reachability and
    /// latency (§4.8: "broker reachability, ping latency").
    pub async fn ping(&self) -> Result<Duration, JobError> {
        let started = std::time::Instant::now();
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))?;
        Ok(started.elapsed())
    }

    pub async fn channel_depth(&self, job_type: JobType) -> Result<ChannelDepth, JobError> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
SELECT
    COUNT(*) FILTER (WHERE status = 'queued' AND scheduled_at <= NOW()) AS waiting,
    COUNT(*) FILTER (WHERE status = 'processing') AS active,
    COUNT(*) FILTER (WHERE status = 'queued' AND scheduled_at > NOW()) AS delayed,
    COUNT(*) FILTER (WHERE status = 'failed') AS failed,
    COUNT(*) FILTER (WHERE status = 'completed') AS completed
FROM jobs
WHERE job_type = $1
            "#,
        )
        .bind(job_type)
        .fetch_one(self.pool())
        .await
        .map_err(|error| JobError::new(Kind::BrokerFailure, error.to_string()))?;

        Ok(ChannelDepth {
            waiting: row.0,
            active: row.1,
            delayed: row.2,
            failed: row.3,
            completed: row.4,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelDepth {
    pub waiting: i64,
    pub active: i64,
    pub delayed: i64,
    pub failed: i64,
    pub completed: i64,
}

/// Priority ordering is best-effort per §4.3; this is just the numeric
/// mapping the `ORDER BY priority` clause above relies on via the
/// `job_priority` enum's declaration order in `migrations/0001_jobs.sql`
/// (`low < normal < high < urgent < critical`, matching `Priority::as_numeric`).
pub fn priority_rank(priority: Priority) -> i16 {
    priority.as_numeric()
}

/// Unused by any query directly, but used by the Worker Runtime to decide
/// whether a job is currently visible in this broker's bookkeeping.
pub fn is_queued(status: JobStatus) -> bool {
    matches!(status, JobStatus::Queued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_matches_spec_ordering() {
        assert!(priority_rank(Priority::Critical) > priority_rank(Priority::Urgent));
        assert!(priority_rank(Priority::Urgent) > priority_rank(Priority::High));
        assert!(priority_rank(Priority::High) > priority_rank(Priority::Normal));
        assert!(priority_rank(Priority::Normal) > priority_rank(Priority::Low));
    }

    #[test]
    fn test_is_queued() {
        assert!(is_queued(JobStatus::Queued));
        assert!(!is_queued(JobStatus::Processing));
    }
}
