//! The Processor contract (§4.4): a thin adapter between a consumer
//! callback and a Domain Service, generalizing the teacher's
//! `hook-worker::worker::process_webhook_job` from one hard-coded webhook
//! call to any `job_common::domain::DomainService`.

use async_trait::async_trait;
use job_common::domain::{DomainRequest, DomainService, ProgressReporter};
use job_common::error::JobError;
use job_common::service::JobService;
use serde_json::Value;

/// `execute`/`onFinalFailure` (§4.4). Base cross-cutting behaviors
/// (in-flight locking, error classification, `alreadyLogged` marking) live
/// in `runtime::ChannelConsumer`, common to every `Processor`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn execute(&self, external_id: &str, payload: &Value) -> Result<Value, JobError>;

    /// Called once retries are exhausted (§4.4: "must leave the Domain
    /// Record consistent"). The base implementation is a no-op; Processors
    /// owning their own side records (the Webhook Dispatcher's delivery
    /// rows) override this.
    async fn on_final_failure(&self, _external_id: &str, _payload: &Value, _error: &JobError) {}
}

/// Adapts a `DomainService` into a `Processor`, reporting progress back
/// through the Job Service (§4.4: "Report progress through Job Service").
pub struct DomainProcessor<D> {
    domain: D,
    service: JobService,
}

impl<D> DomainProcessor<D> {
    pub fn new(domain: D, service: JobService) -> Self {
        Self { domain, service }
    }
}

#[async_trait]
impl<D: DomainService> Processor for DomainProcessor<D> {
    async fn execute(&self, external_id: &str, payload: &Value) -> Result<Value, JobError> {
        let reporter = ServiceProgressReporter {
            service: self.service.clone(),
            external_id: external_id.to_string(),
        };

        let request = DomainRequest {
            external_id: external_id.to_string(),
            payload: payload.clone(),
        };

        let outcome = self.domain.process(request, &reporter).await?;
        Ok(outcome.result)
    }
}

struct ServiceProgressReporter {
    service: JobService,
    external_id: String,
}

#[async_trait]
impl ProgressReporter for ServiceProgressReporter {
    async fn report(&self, progress: i16, current_step: Option<&str>, total_steps: Option<i32>) {
        if let Err(error) = self
            .service
            .update_job_progress(&self.external_id, progress, current_step, total_steps)
            .await
        {
            tracing::warn!(external_id = %self.external_id, %error, "failed to report progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use job_common::domain::DomainOutcome;

    struct EchoOnce;

    #[async_trait]
    impl DomainService for EchoOnce {
        async fn process(&self, request: DomainRequest, progress: &dyn ProgressReporter) -> Result<DomainOutcome, JobError> {
            progress.report(100, None, None).await;
            Ok(DomainOutcome { result: request.payload })
        }
    }

    struct NoopReporter;

    #[async_trait]
    impl ProgressReporter for NoopReporter {
        async fn report(&self, _progress: i16, _current_step: Option<&str>, _total_steps: Option<i32>) {}
    }

    #[tokio::test]
    async fn test_base_processor_on_final_failure_is_a_noop_by_default() {
        struct Bare;

        #[async_trait]
        impl Processor for Bare {
            async fn execute(&self, _external_id: &str, payload: &Value) -> Result<Value, JobError> {
                Ok(payload.clone())
            }
        }

        let processor = Bare;
        processor
            .on_final_failure("job1", &serde_json::json!({}), &JobError::validation("x"))
            .await;
    }

    #[tokio::test]
    async fn test_domain_service_process_is_reachable_directly() {
        let service = EchoOnce;
        let outcome = service
            .process(
                DomainRequest { external_id: "x".to_string(), payload: serde_json::json!({"a": 1}) },
                &NoopReporter,
            )
            .await
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!({"a": 1}));
    }
}
