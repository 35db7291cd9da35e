//! The Janitor's periodic maintenance sweeps (§4.8, §7): cleanup of old
//! terminal jobs, stalled-job reclaim, and the webhook delivery retry +
//! cleanup sweeps. Each sweep is its own `tokio::time::interval` loop, run
//! concurrently from `main`, mirroring the teacher's one-responsibility-
//! per-loop shape (`hook-worker::worker::WebhookWorker::run` being the
//! single-loop precedent generalized here to several independent loops).

use std::time::Duration;

use job_common::job::JobStatus;
use job_common::queue::QueueBroker;
use job_common::service::JobService;
use job_common::store::JobStore;
use job_common::webhook_store::WebhookStore;

/// Re-enqueues Jobs stuck in `pending` (§4.1): the recovery path for a
/// `create_job` whose post-commit broker call failed and was swallowed
/// rather than propagated, leaving the Job durably `pending` with no
/// queue entry to pick it up.
pub async fn pending_reconcile_loop(service: JobService, interval: Duration, stale_after: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match service.reconcile_stuck_pending(stale_after).await {
            Ok(requeued) if requeued > 0 => tracing::info!(requeued, "pending reconcile sweep re-enqueued stuck jobs"),
            Ok(_) => {}
            Err(error) => tracing::error!(%error, "pending reconcile sweep failed"),
        }
    }
}

/// `cleanupOldJobs` on a fixed interval (§4.2, §7: "cleanup policy is
/// driven per job based on `removeOnCompleteCount`/Age or a default
/// retention window"). The interval-driven sweep here enforces the default
/// retention window; per-job overrides are honored as rows age out of it.
pub async fn cleanup_loop(store: JobStore, interval: Duration, retention_days: i64) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.cleanup_old_jobs(retention_days).await {
            Ok(removed) if removed > 0 => tracing::info!(removed, "cleanup sweep removed old jobs"),
            Ok(_) => {}
            Err(error) => tracing::error!(%error, "cleanup sweep failed"),
        }
    }
}

/// Drives `QueueBroker::reclaim_stalled` (§4.3: "a periodic reclaim pass
/// scans for entries whose lock has expired").
pub async fn stalled_reclaim_loop(broker: QueueBroker, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match broker.reclaim_stalled().await {
            Ok(reclaimed) if reclaimed > 0 => tracing::info!(reclaimed, "reclaimed stalled jobs"),
            Ok(_) => {}
            Err(error) => tracing::error!(%error, "stalled reclaim sweep failed"),
        }
    }
}

/// Finds webhook deliveries whose `nextRetryAt` has passed and re-enqueues
/// their underlying job (§4.7: "a periodic sweep finds deliveries whose
/// nextRetryAt <= now and enqueues them again"). The per-subscription
/// retry budget (`maxRetries`) is authoritative here, not the generic
/// Job-level `retry_count` (see DESIGN.md): a delivery past its budget is
/// marked `exhausted` instead of being re-enqueued.
pub async fn webhook_retry_loop(
    webhook_store: WebhookStore,
    service: JobService,
    broker: QueueBroker,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(error) = webhook_retry_sweep(&webhook_store, &service, &broker).await {
            tracing::error!(%error, "webhook retry sweep failed");
        }
    }
}

async fn webhook_retry_sweep(
    webhook_store: &WebhookStore,
    service: &JobService,
    broker: &QueueBroker,
) -> Result<(), job_common::error::JobError> {
    let due = webhook_store.due_for_retry().await?;
    if due.is_empty() {
        return Ok(());
    }

    let mut requeued = 0u32;
    for delivery in due {
        let Some(subscription) = webhook_store.subscription(delivery.subscription_id).await? else {
            continue;
        };

        let attempts_made = delivery.attempts_vec().len() as i32;
        if attempts_made > subscription.max_retries {
            webhook_store.mark_exhausted(delivery.id).await?;
            tracing::warn!(delivery_id = %delivery.id, "webhook delivery exhausted its subscription retry budget");
            continue;
        }

        let in_flight = matches!(
            service.find_job_by_id(&delivery.job_external_id).await?,
            Some(job) if matches!(job.status, JobStatus::Queued | JobStatus::Processing | JobStatus::Retrying)
        );
        if in_flight {
            continue;
        }

        broker.enqueue(&delivery.job_external_id, 0).await?;
        requeued += 1;
    }

    if requeued > 0 {
        tracing::info!(requeued, "webhook retry sweep re-enqueued deliveries");
    }
    Ok(())
}

/// `cleanup_old_deliveries` on a fixed interval (§4.7: "cleanup removes
/// successful delivery records older than a configured retention").
pub async fn webhook_cleanup_loop(webhook_store: WebhookStore, interval: Duration, retention_days: i64) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match webhook_store.cleanup_old_deliveries(retention_days).await {
            Ok(removed) if removed > 0 => tracing::info!(removed, "webhook cleanup sweep removed delivery records"),
            Ok(_) => {}
            Err(error) => tracing::error!(%error, "webhook cleanup sweep failed"),
        }
    }
}
