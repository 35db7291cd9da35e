//! Error types for the outbound webhook HTTP path (§4.7). Kept local to
//! `job-worker` since these are request/response plumbing details, not
//! part of the core taxonomy; they are bridged into a `job_common::error::JobError`
//! at the `Processor` boundary. Mirrors the teacher's
//! `hook-worker::error::{WebhookError, WorkerError}` split, minus the
//! `ParseHttpMethodError` variant (the wire format always POSTs, so the
//! method never needs parsing).

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookResponseError {
    #[error("error reading response body: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("response body was not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook url: {0}")]
    ParseUrlError(#[from] url::ParseError),
    #[error("invalid header {name}: {source}")]
    InvalidHeader { name: String, source: String },
    #[error("request failed before a response was received: {0}")]
    SendFailed(reqwest::Error),
    #[error("received retryable status {status}")]
    RetryableStatus {
        status: StatusCode,
        retry_after: Option<Duration>,
        response_snippet: Option<String>,
    },
    #[error("received non-retryable status {status}")]
    TerminalStatus {
        status: StatusCode,
        response_snippet: Option<String>,
    },
}

impl WebhookError {
    pub fn response_snippet(&self) -> Option<&str> {
        match self {
            WebhookError::RetryableStatus { response_snippet, .. } => response_snippet.as_deref(),
            WebhookError::TerminalStatus { response_snippet, .. } => response_snippet.as_deref(),
            _ => None,
        }
    }

    /// Folds into the core taxonomy (§4.6): a retryable send carries its
    /// `Retry-After` hint through; anything else is a terminal domain
    /// failure.
    pub fn into_job_error(self) -> job_common::error::JobError {
        match self {
            WebhookError::SendFailed(error) => {
                job_common::error::JobError::classify_domain_failure(&error.to_string(), Some(true))
            }
            WebhookError::RetryableStatus { status, retry_after, .. } => {
                let mut err = job_common::error::JobError::classify_domain_failure(
                    &format!("webhook endpoint returned status {status}"),
                    Some(true),
                );
                err.retry_after = retry_after;
                err
            }
            WebhookError::TerminalStatus { status, .. } => job_common::error::JobError::classify_domain_failure(
                &format!("webhook endpoint returned status {status}"),
                Some(false),
            ),
            WebhookError::ParseUrlError(error) => job_common::error::JobError::validation(error.to_string()),
            WebhookError::InvalidHeader { name, source } => {
                job_common::error::JobError::validation(format!("invalid header {name}: {source}"))
            }
        }
    }
}
