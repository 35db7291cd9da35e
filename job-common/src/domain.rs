//! Domain Service trait seams (§1, §2): the external collaborators that
//! turn a payload into a result for one `JobType`. The kernel depends only
//! on this trait, never on a concrete parsing/enhancement/evaluation/
//! generation implementation (those are Non-goals, §2). The shape mirrors
//! the teacher's `capture::sinks::Event` trait (one async entrypoint per
//! concern, swappable behind a trait object) with a `PrintSink`-style
//! reference implementation for exercising the kernel in tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;

/// Work handed to a Domain Service by the Worker Runtime (§4.4).
#[derive(Debug, Clone)]
pub struct DomainRequest {
    pub external_id: String,
    pub payload: Value,
}

/// What a Domain Service hands back on success (§4.4: "the runtime treats
/// the result as opaque JSON").
#[derive(Debug, Clone)]
pub struct DomainOutcome {
    pub result: Value,
}

/// One callback per channel's processing logic. A `ProgressReporter` is
/// threaded through so a long-running implementation can call back into
/// the Worker Runtime without depending on it directly.
#[async_trait]
pub trait DomainService: Send + Sync {
    async fn process(
        &self,
        request: DomainRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<DomainOutcome, JobError>;
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: i16, current_step: Option<&str>, total_steps: Option<i32>);
}

/// A reference implementation that logs and echoes its input back as the
/// result, used to exercise the kernel end-to-end without a real domain
/// collaborator wired in (grounded on `capture::sinks::print::PrintSink`,
/// which plays the same role for the teacher's `Event` trait).
pub struct EchoDomainService {
    pub channel: &'static str,
}

#[async_trait]
impl DomainService for EchoDomainService {
    async fn process(
        &self,
        request: DomainRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<DomainOutcome, JobError> {
        tracing::info!(channel = self.channel, external_id = %request.external_id, "processing job");
        metrics::counter!("job_domain_processed_total", "channel" => self.channel).increment(1);

        progress.report(50, Some("processing"), Some(2)).await;
        progress.report(100, Some("done"), Some(2)).await;

        Ok(DomainOutcome {
            result: request.payload,
        })
    }
}
