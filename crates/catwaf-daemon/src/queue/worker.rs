//! Job execution loop.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::JobKind;
use crate::banlist::BanListSynchronizer;
use crate::certs::CertificateManager;
use crate::error::{ControlError, ControlResult};
use crate::regen::ConfigRegenerator;
use crate::storage::{Database, Job, JobStatus};

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job_id: i64,
    pub job_type: String,
    /// `Completed`, `Failed`, or `Pending` when returned for a retry.
    #[serde(serialize_with = "serialize_status")]
    pub status: JobStatus,
    pub error: Option<String>,
}

fn serialize_status<S: serde::Serializer>(status: &JobStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

/// Claims pending jobs one at a time and runs them.
#[derive(Debug, Clone)]
pub struct Worker {
    db: Database,
    certs: CertificateManager,
    regen: ConfigRegenerator,
    bans: BanListSynchronizer,
    poll_interval: Duration,
}

impl Worker {
    pub const fn new(
        db: Database,
        certs: CertificateManager,
        regen: ConfigRegenerator,
        bans: BanListSynchronizer,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            certs,
            regen,
            bans,
            poll_interval,
        }
    }

    /// Settle jobs and certificate state left behind by a previous process.
    pub async fn recover(&self) -> ControlResult<()> {
        let (requeued, failed) = self.db.recover_interrupted_jobs().await?;
        let certs = self.db.fail_orphaned_issuance().await?;
        if requeued + failed + certs > 0 {
            warn!(requeued, failed, certificates = certs, "Recovered interrupted jobs");
        }
        Ok(())
    }

    /// Spawn the worker loop.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run jobs until shutdown. Idle polls wait `poll_interval`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "Job worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(error = %e, "Job worker iteration failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        info!("Job worker shutting down");
    }

    /// Claim and execute at most one job.
    pub async fn run_once(&self) -> ControlResult<Option<JobOutcome>> {
        let Some(job) = self.db.claim_next_job().await? else {
            return Ok(None);
        };
        info!(job_id = job.id, job_type = %job.job_type, attempt = job.attempts, "Job started");

        let outcome = match self.dispatch(&job).await {
            Ok(result) => {
                self.db.complete_job(job.id, Some(&result.to_string())).await?;
                info!(job_id = job.id, job_type = %job.job_type, "Job completed");
                JobOutcome {
                    job_id: job.id,
                    job_type: job.job_type,
                    status: JobStatus::Completed,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                let status = if e.is_retryable() && job.attempts < job.max_attempts {
                    self.db.requeue_job(job.id, &message).await?;
                    warn!(job_id = job.id, attempt = job.attempts, error = %message, "Job failed, will retry");
                    if JobKind::parse(&job.job_type) == Some(JobKind::CertIssue) {
                        let payload = job.payload_value();
                        if let Some(domain) = payload.get("domain").and_then(serde_json::Value::as_str) {
                            self.certs.resume_issuance(domain, job.id).await?;
                        }
                    }
                    JobStatus::Pending
                } else {
                    self.db.fail_job(job.id, &message).await?;
                    error!(job_id = job.id, job_type = %job.job_type, error = %message, "Job failed");
                    JobStatus::Failed
                };
                JobOutcome {
                    job_id: job.id,
                    job_type: job.job_type,
                    status,
                    error: Some(message),
                }
            }
        };
        Ok(Some(outcome))
    }

    async fn dispatch(&self, job: &Job) -> ControlResult<serde_json::Value> {
        let kind = JobKind::parse(&job.job_type)
            .ok_or_else(|| ControlError::validation(format!("unknown job type: {}", job.job_type)))?;
        let payload = job.payload_value();

        match kind {
            JobKind::CertIssue => {
                let domain = payload
                    .get("domain")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| ControlError::validation("cert_issue payload needs a domain"))?;
                let issued = self.certs.execute_issuance(domain).await?;
                Ok(json!({
                    "domain": issued.domain,
                    "not_after": issued.info.not_after,
                    "reload_warning": issued.reload_warning,
                }))
            }
            JobKind::ConfigRegen => match payload.get("site_id") {
                Some(id) => {
                    let site_id = id
                        .as_i64()
                        .ok_or_else(|| ControlError::validation("site_id must be an integer"))?;
                    let outcome = self.regen.regenerate_one(site_id).await?;
                    outcome.reload.wait().await.into_result()?;
                    Ok(json!({ "site_id": site_id }))
                }
                None => {
                    let mut report = self.regen.regenerate_all().await?;
                    if let Some(ticket) = report.reload.take() {
                        ticket.wait().await.into_result()?;
                    }
                    Ok(serde_json::to_value(&report).unwrap_or_default())
                }
            },
            JobKind::BanlistSync => {
                let changed = match self.bans.resync().await? {
                    Some(ticket) => {
                        ticket.wait().await.into_result()?;
                        true
                    }
                    None => false,
                };
                Ok(json!({ "changed": changed }))
            }
        }
    }
}
