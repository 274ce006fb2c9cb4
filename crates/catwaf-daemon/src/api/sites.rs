//! Site and regeneration handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiResult;
use crate::control::SiteSaved;
use crate::queue::{JobKind, NewJob};
use crate::storage::{SiteInput, SiteRow};

/// `GET /api/sites`
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<SiteRow>>> {
    Ok(Json(state.plane.db.list_sites().await?))
}

/// `GET /api/sites/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<SiteRow>> {
    Ok(Json(state.plane.db.get_site(id).await?))
}

/// `POST /api/sites`
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<SiteInput>,
) -> ApiResult<(StatusCode, Json<SiteSaved>)> {
    let saved = state.plane.save_site(None, &input).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `PUT /api/sites/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<SiteInput>,
) -> ApiResult<Json<SiteSaved>> {
    Ok(Json(state.plane.save_site(Some(id), &input).await?))
}

/// `DELETE /api/sites/{id}`
pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let site = state.plane.delete_site(id).await?;
    Ok(Json(json!({ "deleted": site.id, "domain": site.domain })))
}

/// `GET /api/sites/{id}/config`
pub async fn preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let text = state.plane.regen.preview(id).await?;
    Ok(([("content-type", "text/plain; charset=utf-8")], text))
}

/// `POST /api/regenerate/all`
pub async fn regenerate_all(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = state
        .plane
        .queue
        .create(NewJob::new(JobKind::ConfigRegen, json!({})))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": id }))))
}

/// `POST /api/regenerate/site/{id}`
///
/// Answers once the proxy has reloaded; a failed reload is an error.
pub async fn regenerate_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let outcome = state.plane.regen.regenerate_one(id).await?;
    outcome.reload.wait().await.into_result()?;
    Ok(Json(json!({
        "site_id": outcome.site_id,
        "path": outcome.path,
    })))
}
