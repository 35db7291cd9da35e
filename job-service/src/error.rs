//! Maps `job_common::error::JobError` onto the HTTP error envelope (§6, §7):
//! `{ success: false, error: { code, message, timestamp, context?, metadata?,
//! retryable?, retryAfter? } }`. This is the "global error middleware" the
//! spec calls for, implemented as an `IntoResponse` impl on a thin wrapper
//! rather than a tower layer, mirroring how the teacher lets its own
//! `CaptureError` implement `IntoResponse` directly in `capture::api`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use job_common::error::{JobError, Kind};
use serde_json::json;

pub struct ApiError(pub JobError);

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        Self(error)
    }
}

fn status_for(kind: Kind) -> StatusCode {
    match kind {
        Kind::ValidationFailed => StatusCode::BAD_REQUEST,
        Kind::NotFound => StatusCode::NOT_FOUND,
        Kind::Forbidden => StatusCode::FORBIDDEN,
        Kind::InvalidState => StatusCode::CONFLICT,
        Kind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Kind::StoreFailure | Kind::BrokerFailure | Kind::DomainFailure | Kind::Timeout | Kind::Unknown => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;

        if error.mark_logged_if_new() {
            tracing::warn!(kind = ?error.kind, message = %error.message, "request failed");
        }

        let status = status_for(error.kind);
        let body = json!({
            "success": false,
            "error": {
                "code": error.kind,
                "message": error.message,
                "timestamp": chrono::Utc::now(),
                "context": error.context,
                "metadata": error.metadata,
                "retryable": error.is_retryable(),
                "retryAfter": error.retry_after.map(|d| d.as_secs()),
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failed_maps_to_400() {
        assert_eq!(status_for(Kind::ValidationFailed), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_state_maps_to_409() {
        assert_eq!(status_for(Kind::InvalidState), StatusCode::CONFLICT);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        assert_eq!(status_for(Kind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }
}
