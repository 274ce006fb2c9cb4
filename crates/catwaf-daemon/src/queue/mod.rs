//! Job Queue Manager.
//!
//! Jobs are durable rows; [`Worker`] claims and executes them one at a time.

mod worker;

use catwaf_core::config::QueueConfig;
use serde::Deserialize;
use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::storage::{Database, Job, JobStats, JobStatus};

pub use worker::{JobOutcome, Worker};

/// Page size when the caller gives none.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Job types the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Payload `{"domain": ...}`.
    CertIssue,
    /// Payload `{"site_id": ...}`, or empty for the whole fleet.
    ConfigRegen,
    /// Rebuild the deny-list from the store.
    BanlistSync,
}

impl JobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CertIssue => "cert_issue",
            Self::ConfigRegen => "config_regen",
            Self::BanlistSync => "banlist_sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::CertIssue, Self::ConfigRegen, Self::BanlistSync]
            .into_iter()
            .find(|kind| kind.as_str() == s)
    }
}

/// Input to [`JobQueue::create`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i64,
    pub max_attempts: Option<i64>,
}

impl NewJob {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            job_type: kind.as_str().to_string(),
            payload,
            priority: 0,
            max_attempts: None,
        }
    }

    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Durable job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
    default_max_attempts: i64,
    list_limit_max: i64,
}

impl JobQueue {
    pub fn new(db: Database, config: &QueueConfig) -> Self {
        Self {
            db,
            default_max_attempts: config.default_max_attempts.max(1),
            list_limit_max: config.list_limit_max.max(1),
        }
    }

    /// Enqueue a job; returns its id.
    pub async fn create(&self, job: NewJob) -> ControlResult<i64> {
        let job_type = job.job_type.trim();
        if job_type.is_empty() {
            return Err(ControlError::validation("job_type is required"));
        }
        let max_attempts = job.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts < 1 {
            return Err(ControlError::validation("max_attempts must be at least 1"));
        }
        let payload = if job.payload.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            job.payload
        };

        let row = self
            .db
            .insert_job(job_type, &payload.to_string(), job.priority, max_attempts)
            .await?;
        info!(job_id = row.id, job_type, priority = row.priority, "Job enqueued");
        Ok(row.id)
    }

    pub async fn get(&self, id: i64) -> ControlResult<Job> {
        Ok(self.db.get_job(id).await?)
    }

    /// List jobs, optionally filtered by status name. `limit` defaults to
    /// [`DEFAULT_LIST_LIMIT`] and is clamped to the configured maximum.
    pub async fn list(&self, status: Option<&str>, limit: Option<i64>) -> ControlResult<Vec<Job>> {
        let status = match status.filter(|s| !s.is_empty()) {
            Some(s) => Some(
                JobStatus::parse(s)
                    .ok_or_else(|| ControlError::validation(format!("invalid job status: {s}")))?,
            ),
            None => None,
        };
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, self.list_limit_max);
        Ok(self.db.list_jobs(status, limit).await?)
    }

    pub async fn delete(&self, id: i64) -> ControlResult<()> {
        self.db.delete_job(id).await?;
        info!(job_id = id, "Job deleted");
        Ok(())
    }

    pub async fn stats(&self) -> ControlResult<JobStats> {
        Ok(self.db.job_stats().await?)
    }

    /// Id of the in-flight job of `kind` for `domain`, if any.
    pub async fn active_for_domain(&self, kind: JobKind, domain: &str) -> ControlResult<Option<i64>> {
        Ok(self.db.find_active_job(kind.as_str(), domain).await?)
    }
}
