//! The Webhook Dispatcher (§4.7): a `Processor` for the `webhook_delivery`
//! channel. Grounded directly on `hook-worker::worker::{process_webhook_job,
//! send_webhook, parse_retry_after_header, is_retryable_status}` plus
//! `hook-worker::util::first_n_bytes_of_response` for the bounded response
//! snippet, extended with the subscription-matching query and per-attempt
//! counters the teacher's single-queue design has no concept of.
//!
//! A webhook job's payload carries `{ subscriptionId, event, payload }`
//! (§4.7 "Input: subscription id, event type, payload"); the dispatcher
//! looks up the subscription, sends the signed POST, and records the
//! attempt regardless of outcome. Retries of the same Job reuse the same
//! delivery row (`get_or_create_delivery`) so attempts accumulate on one
//! record instead of minting a new delivery per try.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use job_common::error::JobError;
use job_common::retry::RetryPolicy;
use job_common::webhook::{sign_payload, DeliveryAttempt, DeliveryStatus, WebhookEvent, WebhookSubscription, WebhookWirePayload};
use job_common::webhook_store::WebhookStore;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::processor::Processor;
use crate::util::first_n_bytes_of_response;

/// Response snippets are truncated to this many bytes before being stored
/// alongside a `DeliveryAttempt`.
const RESPONSE_SNIPPET_BYTES: usize = 512;

#[derive(Debug, Deserialize)]
struct WebhookJobPayload {
    subscription_id: Uuid,
    event: String,
    payload: Value,
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    store: WebhookStore,
    retry_policy: RetryPolicy,
}

impl WebhookDispatcher {
    pub fn new(client: reqwest::Client, store: WebhookStore, retry_policy: RetryPolicy) -> Self {
        Self { client, store, retry_policy }
    }

    async fn deliver(&self, external_id: &str, job_payload: &WebhookJobPayload) -> Result<(), JobError> {
        let subscription = self
            .store
            .subscription(job_payload.subscription_id)
            .await?
            .ok_or_else(|| JobError::not_found(format!("webhook subscription {} not found", job_payload.subscription_id)))?;

        let event = parse_event(&job_payload.event)?;
        if !subscription.subscribes_to(event) {
            tracing::info!(external_id, subscription = %subscription.id, "subscription no longer matches event, skipping");
            return Ok(());
        }

        let delivery = self
            .store
            .get_or_create_delivery(subscription.id, external_id, event, &job_payload.payload)
            .await?;

        let wire_payload = WebhookWirePayload {
            event: event.as_str(),
            job_id: external_id,
            payload: &job_payload.payload,
            timestamp: chrono::Utc::now(),
        };
        let body = serde_json::to_vec(&wire_payload).expect("WebhookWirePayload always serializes");
        let signature = sign_payload(&subscription.secret, &body);

        let started = Instant::now();
        let send_result = send_webhook(&self.client, &subscription, &body, &signature).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match send_result {
            Ok((status, snippet)) => {
                let attempt = DeliveryAttempt {
                    attempted_at: chrono::Utc::now(),
                    status_code: Some(status.as_u16()),
                    duration_ms,
                    response_snippet: snippet,
                    error: None,
                };
                self.store
                    .record_attempt(delivery.id, &attempt, DeliveryStatus::Success, None)
                    .await?;
                self.store.increment_counters(subscription.id, true).await?;
                Ok(())
            }
            Err(error) => {
                let status_code = match &error {
                    WebhookError::RetryableStatus { status, .. } | WebhookError::TerminalStatus { status, .. } => {
                        Some(status.as_u16())
                    }
                    _ => None,
                };
                let snippet = error.response_snippet().map(str::to_owned);
                let message = error.to_string();
                let job_error = error.into_job_error();

                let attempt = DeliveryAttempt {
                    attempted_at: chrono::Utc::now(),
                    status_code,
                    duration_ms,
                    response_snippet: snippet,
                    error: Some(message),
                };

                if job_error.is_retryable() {
                    // `delivery.attempts_vec()` reflects every attempt before
                    // this one; the attempt that just failed is the next
                    // one in sequence (§4.7: `now + base * multiplier^attempt`).
                    let attempt = delivery.attempts_vec().len() as u32 + 1;
                    let delay = self.retry_policy.retry_interval_with_multiplier(
                        attempt,
                        subscription.backoff_multiplier,
                        job_error.retry_after,
                    );
                    let next_retry_at = chrono::Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    self.store
                        .record_attempt(delivery.id, &attempt, DeliveryStatus::Retrying, Some(next_retry_at))
                        .await?;
                } else {
                    self.store
                        .record_attempt(delivery.id, &attempt, DeliveryStatus::Failed, None)
                        .await?;
                }
                self.store.increment_counters(subscription.id, false).await?;

                Err(job_error)
            }
        }
    }
}

#[async_trait]
impl Processor for WebhookDispatcher {
    async fn execute(&self, external_id: &str, payload: &Value) -> Result<Value, JobError> {
        let job_payload: WebhookJobPayload = serde_json::from_value(payload.clone())
            .map_err(|error| JobError::validation(format!("invalid webhook job payload: {error}")))?;

        self.deliver(external_id, &job_payload).await?;
        Ok(serde_json::json!({"delivered": true}))
    }

    async fn on_final_failure(&self, external_id: &str, _payload: &Value, error: &JobError) {
        tracing::warn!(external_id, %error, "webhook delivery exhausted retries");
    }
}

fn parse_event(raw: &str) -> Result<WebhookEvent, JobError> {
    match raw {
        "job.created" => Ok(WebhookEvent::JobCreated),
        "job.completed" => Ok(WebhookEvent::JobCompleted),
        "job.failed" => Ok(WebhookEvent::JobFailed),
        "job.cancelled" => Ok(WebhookEvent::JobCancelled),
        other => Err(JobError::validation(format!("{other} is not a registered webhook event"))),
    }
}

/// Builds the signed, headers-attached POST and classifies the response
/// exactly as `hook-worker::worker::send_webhook` did (2xx success,
/// 429/5xx retryable, everything else terminal), reading a bounded
/// response snippet before the body is dropped either way.
async fn send_webhook(
    client: &reqwest::Client,
    subscription: &WebhookSubscription,
    body: &[u8],
    signature: &str,
) -> Result<(StatusCode, Option<String>), WebhookError> {
    let url: reqwest::Url = subscription.url.parse().map_err(WebhookError::ParseUrlError)?;

    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert(
        "x-webhook-signature",
        HeaderValue::from_str(signature).map_err(|error| WebhookError::InvalidHeader {
            name: "x-webhook-signature".to_string(),
            source: error.to_string(),
        })?,
    );

    for (name, value) in subscription.headers_map() {
        let header_name = HeaderName::from_str(&name).map_err(|error| WebhookError::InvalidHeader {
            name: name.clone(),
            source: error.to_string(),
        })?;
        let header_value = HeaderValue::from_str(&value).map_err(|error| WebhookError::InvalidHeader {
            name: name.clone(),
            source: error.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }

    let response = client
        .post(url)
        .headers(headers)
        .body(body.to_vec())
        .send()
        .await
        .map_err(WebhookError::SendFailed)?;

    let retry_after = parse_retry_after_header(response.headers());
    let status = response.status();
    let snippet = first_n_bytes_of_response(response, RESPONSE_SNIPPET_BYTES).await.ok();

    if status.is_success() {
        Ok((status, snippet))
    } else if is_retryable_status(status) {
        Err(WebhookError::RetryableStatus { status, retry_after, response_snippet: snippet })
    } else {
        Err(WebhookError::TerminalStatus { status, response_snippet: snippet })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn parse_retry_after_header(header_map: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
    let value = header_map.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(secs) = value.parse::<u64>() {
        return Some(std::time::Duration::from_secs(secs));
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(value) {
        let duration = chrono::DateTime::<chrono::Utc>::from(dt) - chrono::Utc::now();
        return duration.to_std().ok();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_status() {
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_parse_retry_after_header_numeric() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "120".parse().unwrap());

        let duration = parse_retry_after_header(&headers).unwrap();
        assert_eq!(duration, std::time::Duration::from_secs(120));
    }

    #[test]
    fn test_parse_retry_after_header_absent_is_none() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after_header(&headers), None);
    }

    #[test]
    fn test_parse_event_rejects_unknown() {
        assert!(parse_event("job.updated").is_err());
        assert_eq!(parse_event("job.completed").unwrap(), WebhookEvent::JobCompleted);
    }
}
