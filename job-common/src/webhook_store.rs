//! Webhook persistence (§4.7): subscription matching, delivery bookkeeping,
//! and the retry/cleanup sweeps the Janitor drives. Mirrors the shape of
//! `store::JobStore` (one struct wrapping a pool, one method per query) but
//! kept separate since subscriptions/deliveries are their own tables, not
//! rows in `jobs`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{JobError, Kind};
use crate::webhook::{DeliveryAttempt, DeliveryStatus, WebhookDelivery, WebhookEvent, WebhookSubscription};

#[derive(Clone)]
pub struct WebhookStore {
    pool: PgPool,
}

impl WebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The matching-active-subscription query (§4.7): suspended/inactive
    /// subscriptions are filtered out in SQL, event membership in Rust
    /// since `event_mask` is a plain text array.
    pub async fn matching_subscriptions(
        &self,
        event: WebhookEvent,
    ) -> Result<Vec<WebhookSubscription>, JobError> {
        let subs = sqlx::query_as::<_, WebhookSubscription>(
            "SELECT * FROM webhook_subscriptions WHERE active = TRUE",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(subs.into_iter().filter(|sub| sub.subscribes_to(event)).collect())
    }

    /// Finds the delivery already tracking this (subscription, job) pair, or
    /// creates one. A job re-dequeued for another attempt must append to the
    /// same delivery row instead of minting a new one (§4.7, §8 scenario 6:
    /// "three attempts recorded" on a single delivery).
    pub async fn get_or_create_delivery(
        &self,
        subscription_id: Uuid,
        job_external_id: &str,
        event: WebhookEvent,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery, JobError> {
        sqlx::query_as::<_, WebhookDelivery>(
            r#"
INSERT INTO webhook_deliveries (subscription_id, job_external_id, event, payload)
VALUES ($1, $2, $3, $4)
ON CONFLICT (subscription_id, job_external_id)
    DO UPDATE SET updated_at = webhook_deliveries.updated_at
RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(job_external_id)
        .bind(event.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    /// Appends an attempt and advances the delivery's state machine
    /// (`pending|retrying -> success|failed|retrying|exhausted`, §4.7).
    pub async fn record_attempt(
        &self,
        delivery_id: Uuid,
        attempt: &DeliveryAttempt,
        next_status: DeliveryStatus,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<Option<WebhookDelivery>, JobError> {
        let status_str = match next_status {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Exhausted => "exhausted",
        };

        sqlx::query_as::<_, WebhookDelivery>(
            r#"
UPDATE webhook_deliveries
SET
    status = $2,
    attempts = attempts || $3::jsonb,
    next_retry_at = $4,
    updated_at = NOW()
WHERE id = $1
RETURNING *
            "#,
        )
        .bind(delivery_id)
        .bind(status_str)
        .bind(serde_json::to_value(std::slice::from_ref(attempt)).expect("DeliveryAttempt always serializes"))
        .bind(next_retry_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    pub async fn increment_counters(&self, subscription_id: Uuid, success: bool) -> Result<(), JobError> {
        let column = if success { "successful_deliveries" } else { "failed_deliveries" };
        let sql = format!("UPDATE webhook_subscriptions SET {column} = {column} + 1 WHERE id = $1");

        sqlx::query(&sql)
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(())
    }

    /// Deliveries due for another attempt, driven by the Janitor's periodic
    /// sweep (§4.7: "finds deliveries whose nextRetryAt <= now").
    pub async fn due_for_retry(&self) -> Result<Vec<WebhookDelivery>, JobError> {
        sqlx::query_as::<_, WebhookDelivery>(
            r#"
SELECT * FROM webhook_deliveries
WHERE status = 'retrying' AND next_retry_at <= NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    /// Marks a delivery `exhausted` without recording another attempt, used
    /// when the Janitor's retry sweep finds a delivery whose subscription
    /// retry budget ran out (§4.7: "retrying -> ... exhausted").
    pub async fn mark_exhausted(&self, delivery_id: Uuid) -> Result<Option<WebhookDelivery>, JobError> {
        sqlx::query_as::<_, WebhookDelivery>(
            r#"
UPDATE webhook_deliveries
SET status = 'exhausted', next_retry_at = NULL, updated_at = NOW()
WHERE id = $1
RETURNING *
            "#,
        )
        .bind(delivery_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    pub async fn subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, JobError> {
        sqlx::query_as::<_, WebhookSubscription>("SELECT * FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))
    }

    /// Removes successful delivery records older than `days` (§4.7
    /// "Cleanup removes successful delivery records older than a
    /// configured retention").
    pub async fn cleanup_old_deliveries(&self, days: i64) -> Result<u64, JobError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);

        let result = sqlx::query(
            "DELETE FROM webhook_deliveries WHERE status = 'success' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| JobError::new(Kind::StoreFailure, error.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test(migrations = "../migrations")]
    async fn test_matching_subscriptions_filters_inactive_and_unmatched(pool: PgPool) {
        let store = WebhookStore::new(pool.clone());

        sqlx::query(
            "INSERT INTO webhook_subscriptions (url, event_mask, secret, active) VALUES
             ('https://a.test', ARRAY['job.completed'], 's1', TRUE),
             ('https://b.test', ARRAY['job.failed'], 's2', TRUE),
             ('https://c.test', ARRAY['job.completed'], 's3', FALSE)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let matches = store.matching_subscriptions(WebhookEvent::JobCompleted).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].url, "https://a.test");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_record_attempt_advances_delivery_state(pool: PgPool) {
        let store = WebhookStore::new(pool.clone());

        let sub_id: (Uuid,) = sqlx::query_as(
            "INSERT INTO webhook_subscriptions (url, event_mask, secret) VALUES ('https://a.test', ARRAY['job.completed'], 's') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let delivery = store
            .get_or_create_delivery(sub_id.0, "parsing1_abc", WebhookEvent::JobCompleted, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(delivery.status, "pending");

        let attempt = DeliveryAttempt {
            attempted_at: Utc::now(),
            status_code: Some(500),
            duration_ms: 12,
            response_snippet: None,
            error: None,
        };

        let updated = store
            .record_attempt(delivery.id, &attempt, DeliveryStatus::Retrying, Some(Utc::now()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, "retrying");
        assert_eq!(updated.attempts_vec().len(), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_get_or_create_delivery_reuses_row_on_retry(pool: PgPool) {
        let store = WebhookStore::new(pool.clone());

        let sub_id: (Uuid,) = sqlx::query_as(
            "INSERT INTO webhook_subscriptions (url, event_mask, secret) VALUES ('https://a.test', ARRAY['job.completed'], 's') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let first = store
            .get_or_create_delivery(sub_id.0, "parsing1_abc", WebhookEvent::JobCompleted, &serde_json::json!({}))
            .await
            .unwrap();
        let second = store
            .get_or_create_delivery(sub_id.0, "parsing1_abc", WebhookEvent::JobCompleted, &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }
}
