//! `/api/certificates` handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiResult;
use crate::certs::{CertRemoval, CertificateStatus, UploadOutcome, UploadRequest};

/// `POST /api/certificates/upload`
pub async fn upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<(StatusCode, Json<UploadOutcome>)> {
    let outcome = state.plane.certs.upload_custom(request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `POST /api/certificates/{domain}`
///
/// Queues issuance and answers immediately; poll the status endpoint.
pub async fn issue(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let job_id = state.plane.certs.request_issuance(&domain).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "domain": domain, "job_id": job_id, "status": "issuing" })),
    ))
}

/// `GET /api/certificates/{domain}`
pub async fn status(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<CertificateStatus>> {
    Ok(Json(state.plane.certs.status(&domain).await?))
}

/// `DELETE /api/certificates/{domain}`
pub async fn remove(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<CertRemoval>> {
    Ok(Json(state.plane.certs.remove(&domain).await?))
}
