//! Bridges Job Service events to Webhook Dispatcher jobs (§4.7 "When the
//! Job ... completes, a delivery is created"). Subscribes to an `EventBus`
//! and, for every `job.created`/`job.completed`/`job.failed`/
//! `job.cancelled` transition, looks up matching active subscriptions and
//! submits one `webhook_delivery` Job per match. Runs as a background task
//! per process, one instance per `EventBus` (§9: events are in-process and
//! do not cross the Job Service / Worker Runtime process boundary).

use serde_json::json;

use crate::events::{EventBus, EventKind, JobEvent};
use crate::job::{CreateJobOptions, JobType};
use crate::service::JobService;
use crate::webhook::WebhookEvent;
use crate::webhook_store::WebhookStore;

fn webhook_event_for(kind: EventKind) -> Option<WebhookEvent> {
    match kind {
        EventKind::Created => Some(WebhookEvent::JobCreated),
        EventKind::Completed => Some(WebhookEvent::JobCompleted),
        EventKind::Failed => Some(WebhookEvent::JobFailed),
        EventKind::Cancelled => Some(WebhookEvent::JobCancelled),
        EventKind::Queued | EventKind::Started | EventKind::Progress | EventKind::Retrying => None,
    }
}

/// Spawns the trigger loop on the current Tokio runtime. The returned
/// handle is rarely awaited; processes run this for their lifetime and let
/// it die with the runtime.
pub fn spawn(events: EventBus, webhook_store: WebhookStore, service: JobService) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut receiver = events.subscribe();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "webhook trigger lagged behind the event bus");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            if event.job_type == JobType::WebhookDelivery {
                // A delivery attempt's own lifecycle never fans out further deliveries.
                continue;
            }

            let Some(webhook_event) = webhook_event_for(event.kind) else { continue };

            if let Err(error) = dispatch(&event, webhook_event, &webhook_store, &service).await {
                tracing::warn!(external_id = %event.external_id, %error, "failed to fan out webhook delivery jobs");
            }
        }
    })
}

async fn dispatch(
    event: &JobEvent,
    webhook_event: WebhookEvent,
    webhook_store: &WebhookStore,
    service: &JobService,
) -> Result<(), crate::error::JobError> {
    let subscriptions = webhook_store.matching_subscriptions(webhook_event).await?;
    if subscriptions.is_empty() {
        return Ok(());
    }

    let job = match service.find_job_by_id(&event.external_id).await? {
        Some(job) => job,
        None => return Ok(()),
    };

    let payload = json!({
        "jobId": job.external_id,
        "jobType": job.job_type,
        "status": job.status,
        "result": job.result,
        "error": job.error,
    });

    for subscription in subscriptions {
        let webhook_payload = json!({
            "subscriptionId": subscription.id,
            "event": webhook_event.as_str(),
            "payload": payload,
        });

        service
            .create_job(JobType::WebhookDelivery, webhook_payload, CreateJobOptions::default())
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_event_for_maps_terminal_kinds_only() {
        assert_eq!(webhook_event_for(EventKind::Created), Some(WebhookEvent::JobCreated));
        assert_eq!(webhook_event_for(EventKind::Completed), Some(WebhookEvent::JobCompleted));
        assert_eq!(webhook_event_for(EventKind::Failed), Some(WebhookEvent::JobFailed));
        assert_eq!(webhook_event_for(EventKind::Cancelled), Some(WebhookEvent::JobCancelled));
        assert_eq!(webhook_event_for(EventKind::Queued), None);
        assert_eq!(webhook_event_for(EventKind::Started), None);
        assert_eq!(webhook_event_for(EventKind::Progress), None);
        assert_eq!(webhook_event_for(EventKind::Retrying), None);
    }
}
