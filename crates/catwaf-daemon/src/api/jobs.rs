//! `/api/jobs` handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiResult;
use crate::queue::NewJob;
use crate::storage::{Job, JobStats};

/// A job with its payload and result decoded.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: i64,
    pub job_type: String,
    pub payload: Value,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            payload: job.payload_value(),
            result: job.result_value(),
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            priority: job.priority,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// `POST /api/jobs`
pub async fn create(
    State(state): State<AppState>,
    Json(job): Json<NewJob>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = state.plane.queue.create(job).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id, "status": "pending" }))))
}

/// `GET /api/jobs?status=&limit=`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobView>>> {
    let jobs = state
        .plane
        .queue
        .list(query.status.as_deref(), query.limit)
        .await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// `GET /api/jobs/stats`
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<JobStats>> {
    Ok(Json(state.plane.queue.stats().await?))
}

/// `GET /api/jobs/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<JobView>> {
    Ok(Json(state.plane.queue.get(id).await?.into()))
}

/// `DELETE /api/jobs/{id}`
pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.plane.queue.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}
