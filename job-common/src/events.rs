//! In-process event emission (§9: "event-emitter style notifications" ->
//! a typed channel per event kind). Delivery is fire-and-forget; a full
//! receiver is not required to exist for a `publish` to succeed.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub kind: EventKind,
    pub external_id: String,
    pub job_type: crate::job::JobType,
    pub status: crate::job::JobStatus,
    pub progress: i16,
}

impl JobEvent {
    pub fn from_job(kind: EventKind, job: &Job) -> Self {
        Self {
            kind,
            external_id: job.external_id.clone(),
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
        }
    }
}

/// A process-wide event bus. Cloning shares the same underlying channel
/// (the teacher's convention of handing singletons to every Processor at
/// start, §9: "process-scoped context").
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget: a publish with no subscribers is not an error.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobStatus, JobType, Priority};
    use chrono::Utc;

    fn sample_job() -> Job {
        Job {
            id: 1,
            external_id: "parsing1_abcdef".to_string(),
            job_type: JobType::Parsing,
            payload: serde_json::json!({}),
            priority: Priority::Normal,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            total_steps: None,
            retry_count: 0,
            max_retries: 3,
            owner_id: None,
            related_entity_id: None,
            tags: vec![],
            metadata: serde_json::json!({}),
            result: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            next_retry_at: None,
        }
    }

    #[tokio::test]
    async fn test_publish_delivers_to_subscriber() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();

        bus.publish(JobEvent::from_job(EventKind::Created, &sample_job()));

        let event = receiver.recv().await.expect("expected an event");
        assert_eq!(event.kind, EventKind::Created);
        assert_eq!(event.external_id, "parsing1_abcdef");
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(JobEvent::from_job(EventKind::Created, &sample_job()));
    }
}
