//! Admin HTTP API.
//!
//! Everything under `/api` except the health probe requires the bearer
//! token when one is configured.

mod auth;
mod bans;
mod certificates;
pub mod error;
mod jobs;
mod sites;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde_json::{Value, json};

use crate::control::ControlPlane;

pub use error::{ApiError, ApiResult};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub plane: ControlPlane,
    /// `None` disables authentication.
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(plane: ControlPlane, api_key: Option<&str>) -> Self {
        Self {
            plane,
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }
}

/// `GET /api/health`
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Build the router with all API routes.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/jobs", post(jobs::create).get(jobs::list))
        .route("/api/jobs/stats", get(jobs::stats))
        .route("/api/jobs/{id}", get(jobs::get).delete(jobs::delete))
        .route("/api/bans", post(bans::ban).get(bans::list))
        .route("/api/bans/auto", get(bans::auto_count))
        .route("/api/bans/{ip_or_id}", get(bans::get).delete(bans::unban))
        .route("/api/regenerate/all", post(sites::regenerate_all))
        .route("/api/regenerate/site/{id}", post(sites::regenerate_site))
        .route("/api/sites", get(sites::list).post(sites::create))
        .route(
            "/api/sites/{id}",
            get(sites::get).put(sites::update).delete(sites::delete),
        )
        .route("/api/sites/{id}/config", get(sites::preview))
        .route("/api/certificates/upload", post(certificates::upload))
        .route(
            "/api/certificates/{domain}",
            post(certificates::issue)
                .get(certificates::status)
                .delete(certificates::remove),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
}
