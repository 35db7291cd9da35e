//! Job Service (§4.1): the single writer of Job state. Every status change
//! in the system passes through one of these methods so the state machine
//! in `job::JobStatus::check_transition` is the only place transitions are
//! decided.

use std::time::Duration;

use tokio::time::sleep;

use crate::error::{JobError, Kind};
use crate::events::{EventBus, EventKind, JobEvent};
use crate::id::generate_external_id;
use crate::job::{CreateJobOptions, Job, JobStatus, JobType, TransitionOutcome};
use crate::queue::QueueBroker;
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use crate::txn::TransactionCoordinator;

/// A brief, one-shot wait applied to `get_job` misses, covering the read-
/// after-write gap on a replica that has not yet caught up with a commit
/// this process just made (§4.2).
const READ_AFTER_WRITE_RETRY_DELAY: Duration = Duration::from_millis(25);

/// A Job inserted inside a caller-supplied transaction, awaiting
/// `JobService::finalize_enqueue` once that transaction commits (§4.1).
#[derive(Debug, Clone)]
pub struct PendingJob {
    external_id: String,
    delay_ms: i64,
}

#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    broker: QueueBroker,
    events: EventBus,
    coordinator: TransactionCoordinator,
    retry_policy: RetryPolicy,
}

impl JobService {
    pub fn new(
        store: JobStore,
        broker: QueueBroker,
        events: EventBus,
        coordinator: TransactionCoordinator,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            broker,
            events,
            coordinator,
            retry_policy,
        }
    }

    /// `createJob` followed immediately by enqueue, inside one atomic scope
    /// so the insert is always visible before the broker makes the job
    /// eligible for pickup (§5 "Critical ordering rule").
    pub async fn create_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        mut options: CreateJobOptions,
    ) -> Result<Job, JobError> {
        if options.external_id.is_none() {
            options.external_id = Some(generate_external_id(job_type, options.owner_id.as_deref()));
        }
        let external_id = options.external_id.clone().expect("just assigned above");
        let delay_ms = options.delay_ms;

        let store = self.store.clone();
        let insert_opts = options.clone();
        let insert_id = external_id.clone();

        let job = self
            .coordinator
            .execute_atomic(move |conn| {
                Box::pin(async move {
                    store.insert(&mut *conn, &insert_id, job_type, payload, &insert_opts).await
                })
            })
            .await?;

        self.events.publish(JobEvent::from_job(EventKind::Created, &job));

        // A failure here is logged and swallowed, not propagated: the Job
        // is already durably committed as `pending`, and the janitor's
        // pending-reconcile sweep re-enqueues it (§4.1 "critical ordering
        // rule" covers the happy path; this is the recovery path for the
        // broker call itself failing after that commit).
        match self.broker.enqueue(&external_id, delay_ms).await {
            Ok(Some(queued)) => {
                self.events.publish(JobEvent::from_job(EventKind::Queued, &queued));
                Ok(queued)
            }
            Ok(None) => Ok(job),
            Err(error) => {
                tracing::warn!(
                    external_id = %external_id,
                    %error,
                    "enqueue after commit failed; job remains pending for the janitor to reconcile"
                );
                Ok(job)
            }
        }
    }

    /// The other half of §4.1's "critical ordering rule": when the caller
    /// supplies its own transaction (e.g. creating a Job as one write among
    /// several in a larger unit of work), the insert joins that transaction
    /// through `executor` and enqueueing is deferred — the caller must call
    /// `finalize_enqueue` once its own transaction has committed, otherwise
    /// the job is correctly persisted but never becomes visible to workers.
    pub async fn create_job_in_transaction<'c, E>(
        &self,
        executor: E,
        job_type: JobType,
        payload: serde_json::Value,
        mut options: CreateJobOptions,
    ) -> Result<PendingJob, JobError>
    where
        E: sqlx::PgExecutor<'c>,
    {
        if options.external_id.is_none() {
            options.external_id = Some(generate_external_id(job_type, options.owner_id.as_deref()));
        }
        let external_id = options.external_id.clone().expect("just assigned above");
        let delay_ms = options.delay_ms;

        let job = self.store.insert(executor, &external_id, job_type, payload, &options).await?;
        self.events.publish(JobEvent::from_job(EventKind::Created, &job));

        Ok(PendingJob { external_id, delay_ms })
    }

    /// Enqueues a job created via `create_job_in_transaction`. Must only be
    /// called after the caller's transaction has committed, so the insert
    /// is guaranteed visible before the broker makes the job eligible for
    /// pickup.
    pub async fn finalize_enqueue(&self, pending: PendingJob) -> Result<Job, JobError> {
        match self.broker.enqueue(&pending.external_id, pending.delay_ms).await? {
            Some(queued) => {
                self.events.publish(JobEvent::from_job(EventKind::Queued, &queued));
                Ok(queued)
            }
            None => Err(JobError::not_found(format!("job {} not found", pending.external_id))),
        }
    }

    /// `getJob`: reads are retried once after a short delay on a miss, to
    /// absorb replica lag immediately following `create_job` (§4.2).
    pub async fn get_job(&self, external_id: &str) -> Result<Job, JobError> {
        if let Some(job) = self.store.find_by_external_id(external_id).await? {
            return Ok(job);
        }

        sleep(READ_AFTER_WRITE_RETRY_DELAY).await;

        self.store
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| JobError::not_found(format!("job {external_id} not found")))
    }

    /// `findJobById`: unlike `get_job`, a miss is `None`, not an error.
    pub async fn find_job_by_id(&self, external_id: &str) -> Result<Option<Job>, JobError> {
        self.store.find_by_external_id(external_id).await
    }

    /// The gatekeeper every status change passes through (§4.1, §8).
    pub async fn update_job_status(
        &self,
        external_id: &str,
        target: JobStatus,
        result: Option<&serde_json::Value>,
        error: Option<&serde_json::Value>,
    ) -> Result<Job, JobError> {
        let current = self.get_job(external_id).await?;

        match current.status.check_transition(target) {
            TransitionOutcome::NoOp | TransitionOutcome::DroppedTerminal => Ok(current),
            TransitionOutcome::Invalid => Err(JobError::invalid_state(current.status.as_str(), target.as_str())),
            TransitionOutcome::Allowed => {
                let updated = self
                    .store
                    .update_status(external_id, target, result, error)
                    .await?
                    .ok_or_else(|| JobError::not_found(format!("job {external_id} not found")))?;

                self.events.publish(JobEvent::from_job(event_kind_for(target), &updated));
                Ok(updated)
            }
        }
    }

    pub async fn update_job_progress(
        &self,
        external_id: &str,
        progress: i16,
        current_step: Option<&str>,
        total_steps: Option<i32>,
    ) -> Result<Job, JobError> {
        let updated = self
            .store
            .update_progress(external_id, progress.clamp(0, 100), current_step, total_steps)
            .await?
            .ok_or_else(|| JobError::not_found(format!("job {external_id} not found")))?;

        self.events.publish(JobEvent::from_job(EventKind::Progress, &updated));
        Ok(updated)
    }

    pub async fn complete_job(&self, external_id: &str, result: serde_json::Value) -> Result<Job, JobError> {
        self.update_job_status(external_id, JobStatus::Completed, Some(&result), None)
            .await
    }

    /// Marks a job terminally failed. Callers deciding between a retry and
    /// a terminal failure should go through `process_job_result` instead.
    pub async fn fail_job(&self, external_id: &str, error: &JobError) -> Result<Job, JobError> {
        self.update_job_status(external_id, JobStatus::Failed, None, Some(&error.to_json()))
            .await
    }

    /// Best-effort cancellation (§4.3): pulls the job out of the broker's
    /// queue if it hasn't been claimed yet, then marks it cancelled
    /// regardless. A job already being processed finishes its current
    /// attempt; the cancellation becomes effective once the Worker Runtime
    /// next checks the job's status.
    pub async fn cancel_job(&self, external_id: &str) -> Result<Job, JobError> {
        let current = self.get_job(external_id).await?;

        match current.status.check_transition(JobStatus::Cancelled) {
            TransitionOutcome::NoOp | TransitionOutcome::DroppedTerminal => Ok(current),
            TransitionOutcome::Invalid => {
                Err(JobError::invalid_state(current.status.as_str(), "cancelled"))
            }
            TransitionOutcome::Allowed => {
                let _ = self.broker.remove_if_queued(external_id).await;

                let updated = self
                    .store
                    .update_status(external_id, JobStatus::Cancelled, None, None)
                    .await?
                    .ok_or_else(|| JobError::not_found(format!("job {external_id} not found")))?;

                self.events.publish(JobEvent::from_job(EventKind::Cancelled, &updated));
                Ok(updated)
            }
        }
    }

    /// Explicit, user-triggered retry (`POST /retry`, §6). Distinct from
    /// the automatic retry path in `process_job_result`: this one is only
    /// valid from a terminal `failed`/`cancelled` state and fails loudly
    /// when the retry budget is exhausted, rather than falling back to a
    /// terminal failure.
    pub async fn retry_job(&self, external_id: &str) -> Result<Job, JobError> {
        let current = self.get_job(external_id).await?;

        if !matches!(current.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(JobError::invalid_state(current.status.as_str(), "retrying"));
        }

        if !current.has_retries_remaining() {
            return Err(JobError::max_retries_exceeded(current.retry_count, current.max_retries));
        }

        self.schedule_and_requeue(&current, None).await
    }

    /// Called by the Worker Runtime once a Domain Service attempt settles
    /// (§4.4, §4.6): success completes the job, a retryable failure with
    /// budget remaining schedules another attempt, anything else fails the
    /// job terminally.
    pub async fn process_job_result(
        &self,
        external_id: &str,
        outcome: Result<serde_json::Value, JobError>,
    ) -> Result<Job, JobError> {
        match outcome {
            Ok(result) => self.complete_job(external_id, result).await,
            Err(error) => {
                let current = self.get_job(external_id).await?;

                if error.is_retryable() && current.has_retries_remaining() {
                    self.schedule_and_requeue(&current, error.retry_after).await
                } else {
                    self.fail_job(external_id, &error).await
                }
            }
        }
    }

    /// Re-enqueues Jobs stuck in `pending` for longer than `older_than`
    /// (§4.1): the recovery path for a `create_job` whose post-commit
    /// enqueue call failed. Run periodically by the janitor's
    /// pending-reconcile sweep; a failure to re-enqueue any one job is
    /// logged and the sweep moves on rather than aborting the batch.
    pub async fn reconcile_stuck_pending(&self, older_than: Duration) -> Result<u32, JobError> {
        let chrono_older_than =
            chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::max_value());
        let stale = self.store.find_stale_pending(chrono_older_than).await?;

        let mut requeued = 0u32;
        for job in stale {
            match self.broker.enqueue(&job.external_id, 0).await {
                Ok(Some(queued)) => {
                    self.events.publish(JobEvent::from_job(EventKind::Queued, &queued));
                    requeued += 1;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        external_id = %job.external_id,
                        %error,
                        "pending reconcile sweep failed to enqueue job"
                    );
                }
            }
        }

        Ok(requeued)
    }

    /// The `failed -> retrying -> queued` two-step (§9 OQ1): `schedule_retry`
    /// makes `retrying` atomic with the retry-count increment, then the
    /// broker immediately re-enqueues at the computed backoff delay.
    async fn schedule_and_requeue(
        &self,
        current: &Job,
        retry_after: Option<Duration>,
    ) -> Result<Job, JobError> {
        let attempt = (current.retry_count + 1).max(1) as u32;
        let delay = self.retry_policy.retry_interval(attempt, retry_after);
        let next_retry_at = chrono::Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);

        let retrying = self
            .store
            .schedule_retry(&current.external_id, next_retry_at, &current.error.clone().unwrap_or_default())
            .await?
            .ok_or_else(|| JobError::not_found(format!("job {} not found", current.external_id)))?;

        self.events.publish(JobEvent::from_job(EventKind::Retrying, &retrying));

        let queued = self
            .broker
            .enqueue(&current.external_id, delay.as_millis() as i64)
            .await?
            .ok_or_else(|| JobError::new(Kind::BrokerFailure, "job disappeared before it could be re-queued"))?;

        self.events.publish(JobEvent::from_job(EventKind::Queued, &queued));
        Ok(queued)
    }
}

fn event_kind_for(status: JobStatus) -> EventKind {
    match status {
        JobStatus::Pending => EventKind::Created,
        JobStatus::Queued => EventKind::Queued,
        JobStatus::Processing => EventKind::Started,
        JobStatus::Completed => EventKind::Completed,
        JobStatus::Failed => EventKind::Failed,
        JobStatus::Retrying => EventKind::Retrying,
        JobStatus::Cancelled => EventKind::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[test]
    fn test_event_kind_for_covers_every_status() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Retrying,
            JobStatus::Cancelled,
        ] {
            let _ = event_kind_for(status);
        }
    }

    fn service_for(pool: PgPool) -> JobService {
        let store = JobStore::new(pool.clone());
        let broker = QueueBroker::new(pool.clone());
        let events = EventBus::new(16);
        let coordinator = TransactionCoordinator::new(pool);
        let retry_policy = crate::retry::RetryPolicy::build(1, Duration::from_secs(60)).provide();
        JobService::new(store, broker, events, coordinator, retry_policy)
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_deferred_enqueue_not_visible_until_finalized(pool: PgPool) {
        let service = service_for(pool.clone());

        let mut txn = pool.begin().await.unwrap();
        let pending = service
            .create_job_in_transaction(&mut *txn, JobType::Parsing, serde_json::json!({}), CreateJobOptions::default())
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let before = service.find_job_by_id(pending_external_id(&pending)).await.unwrap().unwrap();
        assert_eq!(before.status, JobStatus::Pending);

        let queued = service.finalize_enqueue(pending).await.unwrap();
        assert_eq!(queued.status, JobStatus::Queued);
    }

    fn pending_external_id(pending: &PendingJob) -> &str {
        &pending.external_id
    }
}
