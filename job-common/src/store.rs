//! Job Store (§4.2): persistent registry of Jobs. Every write accepts any
//! `sqlx` executor (a pool or an open transaction), mirroring the
//! teacher's `Job::complete<'c, E>(self, executor: E)` pattern in
//! `hook-common::pgqueue` so that a caller-supplied transaction and the
//! store's own pool are interchangeable at the call site.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use crate::error::{JobError, Kind};
use crate::job::{CreateJobOptions, Job, JobStatus, JobType, Priority};

/// Lower bound on `cleanupOldJobs(days)` (§8: "`cleanupOldJobs(days)` with
/// `days < minimum` fails with `ValidationFailed`").
pub const MIN_CLEANUP_AGE_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy)]
pub struct ActivityBucket {
    pub day: DateTime<Utc>,
    pub created: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new Job in `pending` status. Accepts any executor so a
    /// caller-owned transaction can be joined (§4.1 `createJob` with
    /// `externalTransaction`).
    pub async fn insert<'c, E>(
        &self,
        executor: E,
        external_id: &str,
        job_type: JobType,
        payload: serde_json::Value,
        options: &CreateJobOptions,
    ) -> Result<Job, JobError>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let priority = options.priority.unwrap_or_default();
        let max_retries = options.max_retries.unwrap_or(0);

        sqlx::query_as::<_, Job>(
            r#"
INSERT INTO jobs
    (external_id, job_type, payload, priority, status, max_retries,
     owner_id, related_entity_id, tags, metadata)
VALUES
    ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9)
RETURNING *
            "#,
        )
        .bind(external_id)
        .bind(job_type)
        .bind(&payload)
        .bind(priority)
        .bind(max_retries)
        .bind(&options.owner_id)
        .bind(&options.related_entity_id)
        .bind(&options.tags)
        .bind(&options.metadata)
        .fetch_one(executor)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Job>, JobError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    /// Stamps `updated_at`, and `started_at`/`completed_at` when entering
    /// those states; never overwrites an already-set `started_at` (§4.2).
    pub async fn update_status(
        &self,
        external_id: &str,
        new_status: JobStatus,
        result: Option<&serde_json::Value>,
        error: Option<&serde_json::Value>,
    ) -> Result<Option<Job>, JobError> {
        sqlx::query_as::<_, Job>(
            r#"
UPDATE jobs
SET
    status = $2,
    updated_at = NOW(),
    started_at = CASE
        WHEN $2 = 'processing'::job_status AND started_at IS NULL THEN NOW()
        ELSE started_at
    END,
    completed_at = CASE
        WHEN $2 IN ('completed'::job_status, 'cancelled'::job_status, 'failed'::job_status)
        THEN NOW()
        ELSE completed_at
    END,
    result = COALESCE($3, result),
    error = COALESCE($4, error)
WHERE external_id = $1
RETURNING *
            "#,
        )
        .bind(external_id)
        .bind(new_status)
        .bind(result)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    pub async fn update_progress(
        &self,
        external_id: &str,
        progress: i16,
        current_step: Option<&str>,
        total_steps: Option<i32>,
    ) -> Result<Option<Job>, JobError> {
        let clamped = progress.clamp(0, 100);

        sqlx::query_as::<_, Job>(
            r#"
UPDATE jobs
SET
    progress = $2,
    current_step = COALESCE($3, current_step),
    total_steps = COALESCE($4, total_steps),
    updated_at = NOW()
WHERE external_id = $1
RETURNING *
            "#,
        )
        .bind(external_id)
        .bind(clamped)
        .bind(current_step)
        .bind(total_steps)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    /// Increment `retry_count`, reset `progress`, and schedule the next
    /// attempt at `next_retry_at`, in one atomic UPDATE (§9 OQ1: this is
    /// how the `failed -> retrying` transition is made atomic).
    pub async fn schedule_retry(
        &self,
        external_id: &str,
        next_retry_at: DateTime<Utc>,
        error: &serde_json::Value,
    ) -> Result<Option<Job>, JobError> {
        sqlx::query_as::<_, Job>(
            r#"
UPDATE jobs
SET
    status = 'retrying'::job_status,
    retry_count = retry_count + 1,
    progress = 0,
    next_retry_at = $2,
    error = $3,
    updated_at = NOW()
WHERE external_id = $1
RETURNING *
            "#,
        )
        .bind(external_id)
        .bind(next_retry_at)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    /// Paginated listing for the `/history` endpoint (§6), filtered by
    /// type, optional owner, and optional status.
    pub async fn list_history(
        &self,
        job_type: JobType,
        owner_id: Option<&str>,
        status: Option<JobStatus>,
        page: i64,
        limit: i64,
    ) -> Result<Vec<Job>, JobError> {
        let offset = (page - 1).max(0) * limit;

        sqlx::query_as::<_, Job>(
            r#"
SELECT * FROM jobs
WHERE job_type = $1
  AND ($2::text IS NULL OR owner_id = $2)
  AND ($3::job_status IS NULL OR status = $3)
ORDER BY created_at DESC
LIMIT $4 OFFSET $5
            "#,
        )
        .bind(job_type)
        .bind(owner_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    pub async fn count_by_status(
        &self,
        owner_id: Option<&str>,
    ) -> Result<HashMap<JobStatus, i64>, JobError> {
        let rows: Vec<(JobStatus, i64)> = sqlx::query_as(
            r#"
SELECT status, COUNT(*) FROM jobs
WHERE $1::text IS NULL OR owner_id = $1
GROUP BY status
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(rows.into_iter().collect())
    }

    pub async fn count_by_type(
        &self,
        owner_id: Option<&str>,
    ) -> Result<HashMap<JobType, i64>, JobError> {
        let rows: Vec<(JobType, i64)> = sqlx::query_as(
            r#"
SELECT job_type, COUNT(*) FROM jobs
WHERE $1::text IS NULL OR owner_id = $1
GROUP BY job_type
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(rows.into_iter().collect())
    }

    /// Time-bucketed activity over the last week, used by the `/stats`
    /// endpoint (§6).
    pub async fn activity_last_week(&self) -> Result<Vec<ActivityBucket>, JobError> {
        let rows: Vec<(DateTime<Utc>, i64, i64, i64)> = sqlx::query_as(
            r#"
SELECT
    date_trunc('day', created_at) AS day,
    COUNT(*) AS created,
    COUNT(*) FILTER (WHERE status = 'completed') AS completed,
    COUNT(*) FILTER (WHERE status = 'failed') AS failed
FROM jobs
WHERE created_at >= NOW() - INTERVAL '7 days'
GROUP BY day
ORDER BY day
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(day, created, completed, failed)| ActivityBucket {
                day,
                created,
                completed,
                failed,
            })
            .collect())
    }

    /// Delete terminal jobs older than `days`, anchored on
    /// `GREATEST(completed_at, updated_at)` (§9 OQ2). `failed` is
    /// deliberately excluded: it is retryable via `retry_job` (§3, §4.2),
    /// not a terminal state, so a failed-but-retryable job is never swept.
    pub async fn cleanup_old_jobs(&self, days: i64) -> Result<u64, JobError> {
        if days < MIN_CLEANUP_AGE_DAYS {
            return Err(JobError::validation(format!(
                "cleanupOldJobs requires days >= {MIN_CLEANUP_AGE_DAYS}, got {days}"
            )));
        }

        let cutoff = Utc::now() - ChronoDuration::days(days);

        let result = sqlx::query(
            r#"
DELETE FROM jobs
WHERE status IN ('completed', 'cancelled')
  AND GREATEST(COALESCE(completed_at, updated_at), updated_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Jobs stuck in `pending` past `older_than`: created, but never
    /// observed by the broker (§4.1: a post-commit enqueue failure is
    /// "logged and swallowed", leaving the Job `pending` for a sweeper to
    /// re-enqueue). A job this old in `pending` did not simply lose a race
    /// with `create_job`'s own immediate enqueue attempt.
    pub async fn find_stale_pending(&self, older_than: ChronoDuration) -> Result<Vec<Job>, JobError> {
        let cutoff = Utc::now() - older_than;

        sqlx::query_as::<_, Job>(
            r#"
SELECT * FROM jobs
WHERE status = 'pending' AND created_at < $1
ORDER BY created_at
LIMIT 500
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_rejects_days_below_minimum() {
        // This does not need a live pool: validation happens before the
        // query is dispatched.
        let err = validate_cleanup_days(MIN_CLEANUP_AGE_DAYS - 1).unwrap_err();
        assert_eq!(err.kind, Kind::ValidationFailed);
    }

    fn validate_cleanup_days(days: i64) -> Result<(), JobError> {
        if days < MIN_CLEANUP_AGE_DAYS {
            return Err(JobError::validation(format!(
                "cleanupOldJobs requires days >= {MIN_CLEANUP_AGE_DAYS}, got {days}"
            )));
        }
        Ok(())
    }
}
