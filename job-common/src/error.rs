//! Error taxonomy shared by the Job Service, Processors, and the REST surface.
//!
//! A single `JobError` value carries a `Kind` tag plus free-form context and
//! metadata maps, rather than a class hierarchy per failure mode (§9,
//! "class hierarchies for errors"). Classification into retryable/terminal
//! is a pure function over the `Kind` (§4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The taxonomy named in §7. Kinds, not concrete Rust types: every error
/// that crosses a component boundary is collapsed into one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    ValidationFailed,
    NotFound,
    Forbidden,
    InvalidState,
    StoreFailure,
    BrokerFailure,
    DomainFailure,
    Timeout,
    RateLimited,
    Unknown,
}

impl Kind {
    /// Pure classification function used by both the Job Service's retry
    /// logic and a Processor's retry decision (§4.6).
    pub fn is_retryable(self) -> bool {
        matches!(self, Kind::Timeout | Kind::RateLimited | Kind::BrokerFailure)
    }
}

/// A marker preventing an error from being logged twice as it bubbles up
/// through Processor -> broker event hook -> HTTP middleware (§4.4, §7).
#[derive(Debug, Clone, Default)]
struct AlreadyLogged(Arc<AtomicBool>);

impl AlreadyLogged {
    fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn mark(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct JobError {
    pub kind: Kind,
    pub message: String,
    pub context: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub retry_after: Option<std::time::Duration>,
    /// Set by `classify_domain_failure` when the caller already knows
    /// whether the underlying cause is retryable (an explicit flag or a
    /// network-error keyword) but the cause doesn't map to a retryable
    /// `Kind` of its own. Consulted by `is_retryable` before falling back
    /// to the `Kind`-based classification.
    retryable_override: Option<bool>,
    already_logged: AlreadyLogged,
}

impl JobError {
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: HashMap::new(),
            metadata: HashMap::new(),
            retry_after: None,
            retryable_override: None,
            already_logged: AlreadyLogged::default(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(Kind::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Kind::NotFound, message)
    }

    pub fn invalid_state(current: &str, attempted: &str) -> Self {
        let mut err = Self::new(
            Kind::InvalidState,
            format!("cannot transition from {current} to {attempted}"),
        );
        err.context.insert("current_state".to_string(), current.to_string());
        err.context
            .insert("attempted_state".to_string(), attempted.to_string());
        err
    }

    pub fn max_retries_exceeded(retry_count: i32, max_retries: i32) -> Self {
        let mut err = Self::new(
            Kind::ValidationFailed,
            format!("retry_count ({retry_count}) has reached max_retries ({max_retries})"),
        );
        err.context
            .insert("reason".to_string(), "max_retries_exceeded".to_string());
        err
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Whether a Processor should retry this error rather than fail the
    /// job terminally (§4.6). A `retryable_override` set by
    /// `classify_domain_failure` takes precedence, since a `DomainFailure`
    /// kind on its own is ambiguous — it covers both retryable network
    /// causes and genuinely terminal domain rejections.
    pub fn is_retryable(&self) -> bool {
        self.retryable_override.unwrap_or_else(|| self.kind.is_retryable())
    }

    /// Attach a context-derived classification for errors wrapped from a
    /// Domain Service, where the underlying cause is not one of our own
    /// kinds (network errors, explicit flags, or message keywords, §4.6).
    /// Network-transient causes (`econnreset`, connection refused, DNS,
    /// `503`) stay `Kind::DomainFailure` for HTTP status-mapping purposes
    /// but still report `is_retryable() == true` via the override.
    pub fn classify_domain_failure(message: &str, explicit_retryable: Option<bool>) -> Self {
        let lowered = message.to_lowercase();
        let retryable = explicit_retryable.unwrap_or_else(|| {
            lowered.contains("timeout")
                || lowered.contains("temporary")
                || lowered.contains("rate limit")
                || lowered.contains("econnreset")
                || lowered.contains("connection refused")
                || lowered.contains("dns")
                || lowered.contains("429")
                || lowered.contains("503")
        });

        let kind = if retryable {
            if lowered.contains("timeout") {
                Kind::Timeout
            } else if lowered.contains("rate limit") || lowered.contains("429") {
                Kind::RateLimited
            } else {
                Kind::DomainFailure
            }
        } else {
            Kind::DomainFailure
        };

        let mut error = Self::new(kind, message);
        error.retryable_override = Some(retryable);
        error
    }

    /// Returns true if this is the first time this error is being logged,
    /// and marks it as logged as a side effect.
    pub fn mark_logged_if_new(&self) -> bool {
        if self.already_logged.get() {
            false
        } else {
            self.already_logged.mark();
            true
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "message": self.message,
            "context": self.context,
            "metadata": self.metadata,
        })
    }
}

impl Serialize for JobError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            kind: Kind,
            message: String,
            #[serde(default)]
            context: HashMap<String, String>,
            #[serde(default)]
            metadata: HashMap<String, serde_json::Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(JobError {
            kind: raw.kind,
            message: raw.message,
            context: raw.context,
            metadata: raw.metadata,
            retry_after: None,
            retryable_override: None,
            already_logged: AlreadyLogged::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_retryable_classification() {
        assert!(Kind::Timeout.is_retryable());
        assert!(Kind::RateLimited.is_retryable());
        assert!(Kind::BrokerFailure.is_retryable());
        assert!(!Kind::ValidationFailed.is_retryable());
        assert!(!Kind::NotFound.is_retryable());
        assert!(!Kind::Forbidden.is_retryable());
    }

    #[test]
    fn test_classify_domain_failure_keywords() {
        assert_eq!(
            JobError::classify_domain_failure("request timeout after 30s", None).kind,
            Kind::Timeout
        );
        assert_eq!(
            JobError::classify_domain_failure("validation: missing field", None).kind,
            Kind::DomainFailure
        );
        assert!(!JobError::classify_domain_failure("validation: missing field", None).is_retryable());
    }

    #[test]
    fn test_classify_domain_failure_network_causes_are_retryable() {
        for message in ["ECONNRESET", "connection refused", "dns lookup failed", "upstream returned 503"] {
            let error = JobError::classify_domain_failure(message, None);
            assert_eq!(error.kind, Kind::DomainFailure, "message: {message}");
            assert!(error.is_retryable(), "message: {message}");
        }
    }

    #[test]
    fn test_classify_domain_failure_explicit_flag_overrides_kind_default() {
        let retryable = JobError::classify_domain_failure("webhook endpoint returned status 500", Some(true));
        assert_eq!(retryable.kind, Kind::DomainFailure);
        assert!(retryable.is_retryable());

        let terminal = JobError::classify_domain_failure("webhook endpoint returned status 400", Some(false));
        assert_eq!(terminal.kind, Kind::DomainFailure);
        assert!(!terminal.is_retryable());
    }

    #[test]
    fn test_mark_logged_if_new_is_one_shot() {
        let err = JobError::validation("bad payload");
        assert!(err.mark_logged_if_new());
        assert!(!err.mark_logged_if_new());
    }
}
