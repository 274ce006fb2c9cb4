//! `/api/bans` handlers.
//!
//! Ban changes answer as soon as the artifact is written; the proxy reload
//! completes in the background.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::AppState;
use super::error::ApiResult;
use crate::banlist::BanRequest;
use crate::reload::ReloadTicket;
use crate::storage::{BanFilter, BanRecord};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: BanFilter,
}

#[derive(Debug, Deserialize)]
pub struct AutoQuery {
    #[serde(default = "default_hours")]
    pub hours: u64,
}

const fn default_hours() -> u64 {
    24
}

fn log_reload_failure(ticket: ReloadTicket, ip: String) {
    tokio::spawn(async move {
        if let Some(warning) = ticket.wait().await.warning() {
            warn!(ip = %ip, warning = %warning, "Reload after ban change failed");
        }
    });
}

/// `POST /api/bans`
pub async fn ban(
    State(state): State<AppState>,
    Json(request): Json<BanRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = state.plane.bans.ban(request).await?;
    log_reload_failure(outcome.reload, outcome.record.ip_address.clone());
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ban": outcome.record,
            "artifact_changed": outcome.artifact_changed,
        })),
    ))
}

/// `GET /api/bans?filter=`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<BanRecord>>> {
    Ok(Json(state.plane.bans.list(query.filter).await?))
}

/// `GET /api/bans/auto?hours=`
pub async fn auto_count(
    State(state): State<AppState>,
    Query(query): Query<AutoQuery>,
) -> ApiResult<Json<Value>> {
    let window = Duration::from_secs(query.hours.saturating_mul(3600));
    let count = state.plane.bans.auto_ban_count(window).await?;
    Ok(Json(json!({ "hours": query.hours, "count": count })))
}

/// `GET /api/bans/{ip_or_id}`
pub async fn get(
    State(state): State<AppState>,
    Path(ip_or_id): Path<String>,
) -> ApiResult<Json<BanRecord>> {
    Ok(Json(state.plane.bans.get(&ip_or_id).await?))
}

/// `DELETE /api/bans/{ip_or_id}`
pub async fn unban(
    State(state): State<AppState>,
    Path(ip_or_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.plane.bans.unban(&ip_or_id).await?;
    log_reload_failure(outcome.reload, outcome.record.ip_address.clone());
    Ok(Json(json!({
        "unbanned": outcome.record.ip_address,
        "artifact_changed": outcome.artifact_changed,
    })))
}
