//! Webhook domain types (§3, §4.7): subscriptions, deliveries, the wire
//! format, and HMAC signing. The job parameters/metadata shapes mirror the
//! teacher's `hook-common::webhook::{WebhookJobParameters, WebhookJobMetadata}`
//! (referenced by `hook-worker::worker` but not itself retrieved), now
//! carrying a subscription reference instead of a bare target URL.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<&HttpMethod> for http::Method {
    fn from(method: &HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(JobError::validation(format!("{other} is not a valid HttpMethod"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    JobCreated,
    JobCompleted,
    JobFailed,
    JobCancelled,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEvent::JobCreated => "job.created",
            WebhookEvent::JobCompleted => "job.completed",
            WebhookEvent::JobFailed => "job.failed",
            WebhookEvent::JobCancelled => "job.cancelled",
        }
    }
}

/// A registered delivery target (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub url: String,
    pub event_mask: Vec<String>,
    pub secret: String,
    pub active: bool,
    pub headers: serde_json::Value,
    pub max_retries: i32,
    pub backoff_multiplier: f64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.active && self.event_mask.iter().any(|e| e == event.as_str())
    }

    pub fn headers_map(&self) -> HashMap<String, String> {
        serde_json::from_value(self.headers.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub response_snippet: Option<String>,
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(code) if (200..300).contains(&code))
    }
}

/// An attempted POST to a subscription (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub job_external_id: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: serde_json::Value,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn attempts_vec(&self) -> Vec<DeliveryAttempt> {
        serde_json::from_value(self.attempts.clone()).unwrap_or_default()
    }

    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        match self.status.as_str() {
            "pending" => Some(DeliveryStatus::Pending),
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            "retrying" => Some(DeliveryStatus::Retrying),
            "exhausted" => Some(DeliveryStatus::Exhausted),
            _ => None,
        }
    }
}

/// The wire body sent to subscribers (§6).
#[derive(Debug, Clone, Serialize)]
pub struct WebhookWirePayload<'a> {
    pub event: &'a str,
    pub job_id: &'a str,
    pub payload: &'a serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

type HmacSha256 = Hmac<Sha256>;

/// Computes the `X-Webhook-Signature` header value over the serialized
/// body using the subscription's secret (§6: "signature header computed
/// over body with subscription secret").
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    hex_encode(&digest)
}

pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    sign_payload(secret, body).eq_ignore_ascii_case(signature)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}
