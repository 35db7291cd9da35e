//! The `/v1/<domain>` REST surface (§6). `<domain>` is one of the
//! registered `JobType`s (`parsing`, `enhancement`, `evaluation`,
//! `generation`, `webhook-delivery`); everything else about routing,
//! request validation, and auth is an external collaborator the core only
//! sees through this thin layer (§1 Out of scope).

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use job_common::job::{CreateJobOptions, Job, JobStatus, JobType, Priority};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::handlers::AppState;

fn parse_domain(domain: &str) -> Result<JobType, ApiError> {
    JobType::from_str(&domain.replace('-', "_")).map_err(ApiError::from)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub owner_id: Option<String>,
    pub priority: Option<String>,
    pub max_retries: Option<i32>,
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub delay_ms: i64,
}

pub async fn submit(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let job_type = parse_domain(&domain)?;

    let options = CreateJobOptions {
        external_id: request.external_id,
        owner_id: request.owner_id,
        priority: request.priority.as_deref().map(|p| Priority::from_str(p).unwrap()),
        max_retries: request.max_retries.or(Some(state.default_max_retries)),
        related_entity_id: request.related_entity_id,
        tags: request.tags,
        metadata: request.metadata,
        delay_ms: request.delay_ms,
    };

    let job = state.service.create_job(job_type, request.payload, options).await?;

    let body = json!({
        "jobId": job.external_id,
        "status": job.status,
        "queuedAt": job.created_at,
        "estimatedTime": serde_json::Value::Null,
        "_links": {
            "self": format!("/v1/{domain}/{}", job.external_id),
            "result": format!("/v1/{domain}/{}/result", job.external_id),
            "cancel": format!("/v1/{domain}/{}/cancel", job.external_id),
        },
    });

    Ok((StatusCode::ACCEPTED, Json(body)))
}

pub async fn status(
    State(state): State<AppState>,
    Path((domain, job_id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    parse_domain(&domain)?;
    let job = state.service.get_job(&job_id).await?;
    Ok(Json(job))
}

pub async fn result(
    State(state): State<AppState>,
    Path((domain, job_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    parse_domain(&domain)?;
    let job = state.service.get_job(&job_id).await?;

    if job.status != JobStatus::Completed {
        return Err(job_common::error::JobError::invalid_state(job.status.as_str(), "completed").into());
    }

    Ok(Json(job.result.unwrap_or(serde_json::Value::Null)))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path((domain, job_id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    parse_domain(&domain)?;
    let job = state.service.cancel_job(&job_id).await?;
    Ok(Json(job))
}

pub async fn retry(
    State(state): State<AppState>,
    Path((domain, job_id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    parse_domain(&domain)?;
    let job = state.service.retry_job(&job_id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "cvId")]
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub jobs: Vec<Job>,
    pub page: i64,
    pub limit: i64,
}

pub async fn history(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let job_type = parse_domain(&domain)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(state.history_page_limit).clamp(1, 200);

    let status = query.status.as_deref().and_then(|s| s.parse::<JobStatus>().ok());

    let jobs = state
        .store
        .list_history(job_type, query.owner_id.as_deref(), status, page, limit)
        .await?;

    Ok(Json(HistoryResponse { jobs, page, limit }))
}

pub async fn stats(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job_type = parse_domain(&domain)?;

    let by_status = state.store.count_by_status(None).await?;
    let activity = state.store.activity_last_week().await?;
    let depth = state.broker.channel_depth(job_type).await?;

    Ok(Json(json!({
        "byStatus": by_status,
        "activityLastWeek": activity.iter().map(|bucket| json!({
            "day": bucket.day,
            "created": bucket.created,
            "completed": bucket.completed,
            "failed": bucket.failed,
        })).collect::<Vec<_>>(),
        "channelDepth": {
            "waiting": depth.waiting,
            "active": depth.active,
            "delayed": depth.delayed,
            "failed": depth.failed,
            "completed": depth.completed,
        },
        "generatedAt": Utc::now(),
    })))
}
