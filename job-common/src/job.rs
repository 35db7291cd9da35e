//! The Job entity and its status state machine (§3, §4.1).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Parsing,
    Enhancement,
    Evaluation,
    Generation,
    WebhookDelivery,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Parsing => "parsing",
            JobType::Enhancement => "enhancement",
            JobType::Evaluation => "evaluation",
            JobType::Generation => "generation",
            JobType::WebhookDelivery => "webhook_delivery",
        }
    }

    pub const ALL: [JobType; 5] = [
        JobType::Parsing,
        JobType::Enhancement,
        JobType::Evaluation,
        JobType::Generation,
        JobType::WebhookDelivery,
    ];
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsing" => Ok(JobType::Parsing),
            "enhancement" => Ok(JobType::Enhancement),
            "evaluation" => Ok(JobType::Evaluation),
            "generation" => Ok(JobType::Generation),
            "webhook_delivery" => Ok(JobType::WebhookDelivery),
            other => Err(JobError::validation(format!("{other} is not a registered job type"))),
        }
    }
}

/// Priority levels mapped to a deterministic numeric order (§4.1: "Priority
/// mapping is deterministic and single-valued; unknown priorities collapse
/// to `normal`"). Higher numeric value is attempted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
    Critical,
}

impl Priority {
    pub fn as_numeric(self) -> i16 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 10,
            Priority::High => 20,
            Priority::Urgent => 30,
            Priority::Critical => 40,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl FromStr for Priority {
    type Err = std::convert::Infallible;

    /// Unknown priorities collapse to `normal` rather than erroring (§4.1).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            "critical" => Priority::Critical,
            _ => Priority::Normal,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// The adjacency list of the state machine in §4.1.
    fn allowed_targets(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Queued, Cancelled],
            Queued => &[Processing, Completed, Failed, Cancelled],
            Processing => &[Completed, Failed, Cancelled],
            Failed => &[Processing, Retrying, Cancelled],
            Retrying => &[Queued, Processing, Failed, Cancelled],
            Completed => &[],
            Cancelled => &[],
        }
    }

    /// Result of attempting a transition, per the three-way rule in §8:
    /// the target is reachable, it's a same-state idempotent no-op, or the
    /// job is already terminal and the transition is silently dropped.
    pub fn check_transition(self, target: JobStatus) -> TransitionOutcome {
        if self == target {
            return TransitionOutcome::NoOp;
        }

        if self.is_terminal() {
            return TransitionOutcome::DroppedTerminal;
        }

        if self.allowed_targets().contains(&target) {
            TransitionOutcome::Allowed
        } else {
            TransitionOutcome::Invalid
        }
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(JobError::validation(format!("{other} is not a job status"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Allowed,
    NoOp,
    DroppedTerminal,
    Invalid,
}

/// Retention/backoff knobs forwarded to the Queue Broker on enqueue (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOptions {
    pub backoff_kind: BackoffKind,
    pub remove_on_complete_count: Option<i32>,
    pub remove_on_fail_age_secs: Option<i64>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            backoff_kind: BackoffKind::Exponential,
            remove_on_complete_count: Some(1000),
            remove_on_fail_age_secs: Some(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// The central entity (§3). Mutated only through the Job Service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub external_id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: JobStatus,
    pub progress: i16,
    pub current_step: Option<String>,
    pub total_steps: Option<i32>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub owner_id: Option<String>,
    pub related_entity_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `retryCount <= maxRetries` at all times (§3, §8).
    pub fn has_retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// The age anchor used by the cleanup sweep (§9 OQ2): `cancelled` jobs
    /// can race a null `completed_at`, so the sweep uses
    /// `max(completed_at, updated_at)` instead of `completed_at` alone.
    pub fn cleanup_anchor(&self) -> DateTime<Utc> {
        match self.completed_at {
            Some(completed_at) if completed_at >= self.updated_at => completed_at,
            _ => self.updated_at,
        }
    }
}

/// Options accepted by `createJob` (§4.1).
#[derive(Debug, Clone, Default)]
pub struct CreateJobOptions {
    pub external_id: Option<String>,
    pub owner_id: Option<String>,
    pub priority: Option<Priority>,
    pub max_retries: Option<i32>,
    pub related_entity_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub delay_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_allows_spec_transitions() {
        assert_eq!(
            JobStatus::Pending.check_transition(JobStatus::Queued),
            TransitionOutcome::Allowed
        );
        assert_eq!(
            JobStatus::Queued.check_transition(JobStatus::Processing),
            TransitionOutcome::Allowed
        );
        assert_eq!(
            JobStatus::Failed.check_transition(JobStatus::Retrying),
            TransitionOutcome::Allowed
        );
        assert_eq!(
            JobStatus::Retrying.check_transition(JobStatus::Queued),
            TransitionOutcome::Allowed
        );
    }

    #[test]
    fn test_state_machine_rejects_invalid_transitions() {
        assert_eq!(
            JobStatus::Pending.check_transition(JobStatus::Processing),
            TransitionOutcome::Invalid
        );
        assert_eq!(
            JobStatus::Completed.check_transition(JobStatus::Processing),
            TransitionOutcome::DroppedTerminal
        );
    }

    #[test]
    fn test_same_state_is_idempotent_noop() {
        assert_eq!(
            JobStatus::Processing.check_transition(JobStatus::Processing),
            TransitionOutcome::NoOp
        );
    }

    #[test]
    fn test_terminal_states_have_no_allowed_targets() {
        assert!(JobStatus::Completed.allowed_targets().is_empty());
        assert!(JobStatus::Cancelled.allowed_targets().is_empty());
    }

    #[test]
    fn test_unknown_priority_collapses_to_normal() {
        assert_eq!("bogus".parse::<Priority>().unwrap(), Priority::Normal);
    }

    #[test]
    fn test_priority_numeric_ordering() {
        assert!(Priority::Critical.as_numeric() > Priority::Urgent.as_numeric());
        assert!(Priority::Urgent.as_numeric() > Priority::High.as_numeric());
        assert!(Priority::High.as_numeric() > Priority::Normal.as_numeric());
        assert!(Priority::Normal.as_numeric() > Priority::Low.as_numeric());
    }
}
