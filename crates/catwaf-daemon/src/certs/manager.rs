//! Certificate lifecycle: issue, upload, install, remove, renew.

use std::time::Duration;

use catwaf_core::Config;
use catwaf_core::db::unix_timestamp;
use catwaf_crypto::{CertInfo, generate_snakeoil, verify_key_pair};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::client::{AcmeClient, base_domain};
use super::layout::CertLayout;
use crate::artifacts::{self, ArtifactLocks, PRIVATE_MODE, PUBLIC_MODE};
use crate::error::{ControlError, ControlResult};
use crate::gateway::ProcessGateway;
use crate::queue::{JobKind, JobQueue, NewJob};
use crate::regen::ConfigRegenerator;
use crate::site::{ChallengeType, validate_domain};
use crate::storage::{CertState, Database, SiteRow};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// User-supplied certificate material.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub domain: String,
    /// PEM chain, leaf first.
    pub certificate: String,
    /// PEM private key.
    pub private_key: String,
}

/// Result of an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub domain: String,
    pub info: CertInfo,
    /// Site switched to the uploaded material, if one serves the domain.
    pub site_id: Option<i64>,
    /// Set when the material was installed but the reload failed.
    pub reload_warning: Option<String>,
}

/// Result of a completed issuance job.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCertificate {
    pub domain: String,
    pub challenge_type: ChallengeType,
    pub info: CertInfo,
    pub reload_warning: Option<String>,
}

/// Result of removing a domain's certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertRemoval {
    pub domain: String,
    pub files_removed: bool,
    pub reload_warning: Option<String>,
}

/// Observable certificate state of a domain.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateStatus {
    pub domain: String,
    pub state: String,
    pub challenge_type: Option<String>,
    pub job_id: Option<i64>,
    pub last_error: Option<String>,
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
    /// Material is present on disk.
    pub installed_files: bool,
}

/// Owns certificate material under the certificate directory.
#[derive(Debug, Clone)]
pub struct CertificateManager {
    db: Database,
    layout: CertLayout,
    client: AcmeClient,
    gateway: ProcessGateway,
    regen: ConfigRegenerator,
    queue: JobQueue,
    locks: ArtifactLocks,
    grace: Duration,
    fallback_credential: Option<String>,
    issuance_max_attempts: i64,
}

impl CertificateManager {
    pub fn new(
        db: Database,
        config: &Config,
        regen: ConfigRegenerator,
        queue: JobQueue,
        locks: ArtifactLocks,
        gateway: ProcessGateway,
    ) -> Self {
        Self {
            db,
            layout: CertLayout::new(&config.paths.certs_dir),
            client: AcmeClient::new(&config.acme, &config.paths),
            gateway,
            regen,
            queue,
            locks,
            grace: Duration::from_secs(config.acme.grace_secs),
            fallback_credential: config.acme.dns_credential.clone().filter(|c| !c.is_empty()),
            issuance_max_attempts: config.queue.issuance_max_attempts.max(1),
        }
    }

    pub const fn layout(&self) -> &CertLayout {
        &self.layout
    }

    /// Queue issuance for the site serving `domain`; returns the job id.
    ///
    /// An issuance already in flight for the domain is returned as-is.
    pub async fn request_issuance(&self, domain: &str) -> ControlResult<i64> {
        validate_domain(domain)?;
        let site = self
            .db
            .find_site_by_domain(domain)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("Site {domain}")))?;
        let challenge = ChallengeType::parse(&site.ssl_challenge_type)?;
        if !challenge.is_automated() {
            return Err(ControlError::validation(format!(
                "{domain} uses custom certificates; upload them instead"
            )));
        }

        if let Some(job_id) = self.queue.active_for_domain(JobKind::CertIssue, domain).await? {
            info!(domain, job_id, "Issuance already in flight");
            return Ok(job_id);
        }

        let job_id = self
            .queue
            .create(
                NewJob::new(JobKind::CertIssue, json!({ "domain": domain }))
                    .max_attempts(self.issuance_max_attempts),
            )
            .await?;
        self.db
            .mark_certificate_issuing(domain, challenge.as_str(), job_id)
            .await?;
        info!(domain, job_id, challenge = challenge.as_str(), "Certificate issuance queued");
        Ok(job_id)
    }

    /// Put the domain back in `issuing` under `job_id` after a failed
    /// attempt that will be retried.
    pub async fn resume_issuance(&self, domain: &str, job_id: i64) -> ControlResult<()> {
        let Some(site) = self.db.find_site_by_domain(domain).await? else {
            return Ok(());
        };
        self.db
            .mark_certificate_issuing(domain, &site.ssl_challenge_type, job_id)
            .await?;
        info!(domain, job_id, "Certificate issuance will be retried");
        Ok(())
    }

    /// Body of a `cert_issue` job.
    pub async fn execute_issuance(&self, domain: &str) -> ControlResult<IssuedCertificate> {
        validate_domain(domain)?;
        let site = match self.db.find_site_by_domain(domain).await? {
            Some(site) => site,
            None => {
                let err = ControlError::not_found(format!("Site {domain}"));
                self.record_failure(domain, None, &err).await;
                return Err(err);
            }
        };
        let challenge = match ChallengeType::parse(&site.ssl_challenge_type) {
            Ok(challenge) => challenge,
            Err(err) => {
                self.record_failure(domain, None, &err).await;
                return Err(err);
            }
        };

        match self.issue(&site, challenge).await {
            Ok(info) => {
                let reload_warning = self.reconcile_domain(domain).await;
                info!(domain, challenge = challenge.as_str(), not_after = info.not_after, "Certificate installed");
                Ok(IssuedCertificate {
                    domain: domain.to_string(),
                    challenge_type: challenge,
                    info,
                    reload_warning,
                })
            }
            Err(err) => {
                self.record_failure(domain, Some(challenge), &err).await;
                Err(err)
            }
        }
    }

    async fn issue(&self, site: &SiteRow, challenge: ChallengeType) -> ControlResult<CertInfo> {
        let domain = site.domain.as_str();
        match challenge {
            ChallengeType::Snakeoil => {
                let bundle = generate_snakeoil(domain)?;
                self.install(domain, challenge, &bundle.cert_pem, &bundle.key_pem)
                    .await
            }
            ChallengeType::Http01 => {
                // The challenge location must be live before the CA calls back.
                if let Some(warning) = self.reconcile_domain(domain).await {
                    warn!(domain, warning = %warning, "Continuing issuance without a confirmed reload");
                }
                if !self.grace.is_zero() {
                    tokio::time::sleep(self.grace).await;
                }
                let spec = self.client.http01_command(domain);
                self.gateway.run_checked(&spec).await?;
                let lineage = self.client.read_lineage(domain)?;
                self.install(domain, challenge, &lineage.fullchain, &lineage.private_key)
                    .await
            }
            ChallengeType::Dns01 => {
                let token = site
                    .dns_credential
                    .clone()
                    .filter(|c| !c.is_empty())
                    .or_else(|| self.fallback_credential.clone())
                    .ok_or_else(|| {
                        ControlError::MissingCredential(format!(
                            "no DNS credential configured for {domain}"
                        ))
                    })?;
                let base = base_domain(domain);
                let credentials = self.client.write_credentials(&token)?;
                let spec = self.client.dns01_command(base, credentials.path());
                self.gateway.run_checked(&spec).await?;
                drop(credentials);
                let lineage = self.client.read_lineage(base)?;
                self.install(domain, challenge, &lineage.fullchain, &lineage.private_key)
                    .await
            }
            ChallengeType::Custom => Err(ControlError::validation(format!(
                "{domain} uses custom certificates; upload them instead"
            ))),
        }
    }

    /// Verify and write material for `domain`, then mark it installed.
    ///
    /// Nothing is written unless the key matches the certificate.
    async fn install(
        &self,
        domain: &str,
        challenge: ChallengeType,
        cert_pem: &str,
        key_pem: &str,
    ) -> ControlResult<CertInfo> {
        let info = verify_key_pair(cert_pem, key_pem)?;

        {
            let _guard = self.locks.lock(&self.layout.dir(domain)).await;
            artifacts::write_atomic(&self.layout.private_key(domain), key_pem.as_bytes(), PRIVATE_MODE)?;
            artifacts::write_atomic(&self.layout.fullchain(domain), cert_pem.as_bytes(), PUBLIC_MODE)?;
        }

        self.db
            .mark_certificate_installed(domain, challenge.as_str(), info.not_before, info.not_after)
            .await?;
        Ok(info)
    }

    async fn record_failure(&self, domain: &str, challenge: Option<ChallengeType>, err: &ControlError) {
        let challenge = match challenge {
            Some(c) => c.as_str().to_string(),
            None => match self.db.get_certificate(domain).await {
                Ok(Some(row)) => row.challenge_type,
                _ => ChallengeType::Http01.as_str().to_string(),
            },
        };
        error!(domain, error = %err, "Certificate issuance failed");
        if let Err(e) = self
            .db
            .mark_certificate_failed(domain, &challenge, &err.to_string())
            .await
        {
            warn!(domain, error = %e, "Failed to record issuance failure");
        }
    }

    /// Regenerate the domain's site and wait for the reload. Returns a
    /// warning instead of failing.
    async fn reconcile_domain(&self, domain: &str) -> Option<String> {
        match self.regen.regenerate_domain(domain).await {
            Ok(Some(outcome)) => outcome.reload.wait().await.warning(),
            Ok(None) => None,
            Err(e) => {
                warn!(domain, error = %e, "Config regeneration after certificate change failed");
                Some(format!("config regeneration failed: {e}"))
            }
        }
    }

    /// Install user-supplied material and switch the site to it.
    pub async fn upload_custom(&self, request: UploadRequest) -> ControlResult<UploadOutcome> {
        let domain = validate_domain(request.domain.trim())?;
        if request.certificate.trim().is_empty() || request.private_key.trim().is_empty() {
            return Err(ControlError::validation("certificate and private_key are required"));
        }

        let info = self
            .install(domain, ChallengeType::Custom, &request.certificate, &request.private_key)
            .await?;
        let site_id = self
            .db
            .set_site_ssl(domain, true, Some(ChallengeType::Custom.as_str()))
            .await?;
        let reload_warning = self.reconcile_domain(domain).await;
        if let Some(warning) = &reload_warning {
            warn!(domain, warning = %warning, "Custom certificate installed but not yet live");
        }
        info!(domain, not_after = info.not_after, "Custom certificate installed");

        Ok(UploadOutcome {
            domain: domain.to_string(),
            info,
            site_id,
            reload_warning,
        })
    }

    pub async fn status(&self, domain: &str) -> ControlResult<CertificateStatus> {
        validate_domain(domain)?;
        let row = self.db.get_certificate(domain).await?;
        let installed_files = self.layout.is_installed(domain);
        Ok(match row {
            Some(row) => CertificateStatus {
                domain: row.domain,
                state: row.state,
                challenge_type: Some(row.challenge_type),
                job_id: row.job_id,
                last_error: row.last_error,
                not_before: row.not_before,
                not_after: row.not_after,
                installed_files,
            },
            None => CertificateStatus {
                domain: domain.to_string(),
                state: CertState::Unrequested.as_str().to_string(),
                challenge_type: None,
                job_id: None,
                last_error: None,
                not_before: None,
                not_after: None,
                installed_files,
            },
        })
    }

    /// Delete material and state for `domain` and turn TLS off for its site.
    pub async fn remove(&self, domain: &str) -> ControlResult<CertRemoval> {
        validate_domain(domain)?;
        let files_removed = {
            let dir = self.layout.dir(domain);
            let _guard = self.locks.lock(&dir).await;
            artifacts::remove_dir(&dir)?
        };
        let row_removed = self.db.delete_certificate(domain).await?;
        if !files_removed && !row_removed {
            return Err(ControlError::not_found(format!("Certificate for {domain}")));
        }

        self.db.set_site_ssl(domain, false, None).await?;
        let reload_warning = self.reconcile_domain(domain).await;
        info!(domain, files_removed, "Certificate removed");

        Ok(CertRemoval {
            domain: domain.to_string(),
            files_removed,
            reload_warning,
        })
    }

    /// Queue issuance for automated certificates expiring within
    /// `threshold_days`. Returns the job ids.
    pub async fn enqueue_renewals(&self, threshold_days: i64) -> ControlResult<Vec<i64>> {
        let before = unix_timestamp() + threshold_days * SECS_PER_DAY;
        let due = self.db.certificates_expiring_before(before).await?;

        let mut jobs = Vec::with_capacity(due.len());
        for row in due {
            match self.request_issuance(&row.domain).await {
                Ok(job_id) => {
                    info!(domain = %row.domain, job_id, not_after = ?row.not_after, "Renewal queued");
                    jobs.push(job_id);
                }
                Err(e) => warn!(domain = %row.domain, error = %e, "Renewal not queued"),
            }
        }
        Ok(jobs)
    }
}
