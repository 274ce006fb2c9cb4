//! Wiring of the control-plane components, and the site workflows that
//! span several of them.

use std::path::PathBuf;
use std::time::Duration;

use catwaf_core::Config;
use serde::Serialize;
use tracing::info;

use crate::artifacts::ArtifactLocks;
use crate::banlist::BanListSynchronizer;
use crate::certs::{CertLayout, CertificateManager};
use crate::error::{ControlError, ControlResult};
use crate::gateway::ProcessGateway;
use crate::queue::{JobQueue, Worker};
use crate::regen::ConfigRegenerator;
use crate::reload::ReloadHandle;
use crate::site::{ChallengeType, validate_input};
use crate::storage::{Database, SiteInput, SiteRow};

/// Result of saving a site.
#[derive(Debug, Serialize)]
pub struct SiteSaved {
    pub site: SiteRow,
    pub config_path: Option<PathBuf>,
    pub reload_warning: Option<String>,
    /// Issuance job queued because TLS is on and no material exists yet.
    pub issuance_job: Option<i64>,
}

/// Every coordinator, sharing one store, one set of artifact locks and one
/// reload handle.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    pub db: Database,
    pub queue: JobQueue,
    pub bans: BanListSynchronizer,
    pub regen: ConfigRegenerator,
    pub certs: CertificateManager,
    pub reload: ReloadHandle,
}

impl ControlPlane {
    pub fn assemble(db: Database, config: &Config, reload: ReloadHandle) -> Self {
        let locks = ArtifactLocks::new();
        let gateway = ProcessGateway::new();
        let queue = JobQueue::new(db.clone(), &config.queue);
        let bans = BanListSynchronizer::new(
            db.clone(),
            config.paths.banlist_path.clone(),
            locks.clone(),
            reload.clone(),
        );
        let regen = ConfigRegenerator::new(
            db.clone(),
            config.paths.sites_dir.clone(),
            CertLayout::new(&config.paths.certs_dir),
            config.paths.acme_webroot.clone(),
            locks.clone(),
            reload.clone(),
        );
        let certs = CertificateManager::new(
            db.clone(),
            config,
            regen.clone(),
            queue.clone(),
            locks,
            gateway,
        );

        Self {
            db,
            queue,
            bans,
            regen,
            certs,
            reload,
        }
    }

    /// A job worker over these components.
    pub fn worker(&self, poll_interval: Duration) -> Worker {
        Worker::new(
            self.db.clone(),
            self.certs.clone(),
            self.regen.clone(),
            self.bans.clone(),
            poll_interval,
        )
    }

    /// Create (`id == None`) or replace a site, regenerate its config, and
    /// queue issuance when TLS is enabled without installed material.
    pub async fn save_site(&self, id: Option<i64>, input: &SiteInput) -> ControlResult<SiteSaved> {
        validate_input(input)?;
        if let Some(existing) = self.db.find_site_by_domain(&input.domain).await?
            && Some(existing.id) != id
        {
            return Err(ControlError::validation(format!(
                "domain {} is already used by site {}",
                input.domain, existing.id
            )));
        }

        let mut challenge_changed = false;
        let site = match id {
            Some(id) => {
                let previous = self.db.get_site(id).await?;
                challenge_changed = previous.ssl_challenge_type != input.ssl_challenge_type;
                let site = self.db.update_site(id, input).await?;
                if previous.domain != site.domain {
                    // The old file would otherwise keep serving the old name.
                    self.regen.remove_site_config(&previous.domain).await?;
                }
                site
            }
            None => self.db.insert_site(input).await?,
        };
        info!(site_id = site.id, domain = %site.domain, "Site saved");

        let outcome = self.regen.regenerate_one(site.id).await?;
        let reload_warning = outcome.reload.wait().await.warning();

        let wants_issuance = site.enabled
            && site.ssl_enabled
            && ChallengeType::parse(&site.ssl_challenge_type)?.is_automated()
            && (challenge_changed || !self.certs.layout().is_installed(&site.domain));
        let issuance_job = if wants_issuance {
            Some(self.certs.request_issuance(&site.domain).await?)
        } else {
            None
        };

        Ok(SiteSaved {
            site,
            config_path: outcome.path,
            reload_warning,
            issuance_job,
        })
    }

    /// Delete a site and its generated config.
    pub async fn delete_site(&self, id: i64) -> ControlResult<SiteRow> {
        let site = self.db.delete_site(id).await?;
        if let Some(ticket) = self.regen.remove_site_config(&site.domain).await? {
            ticket.wait().await.into_result()?;
        }
        info!(site_id = id, domain = %site.domain, "Site deleted");
        Ok(site)
    }
}
