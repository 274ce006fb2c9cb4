//! Reconciles stored sites into generated config files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::render::{RenderContext, render_site};
use crate::artifacts::{self, ArtifactLocks, PUBLIC_MODE};
use crate::certs::CertLayout;
use crate::error::{ControlError, ControlResult};
use crate::reload::{ReloadHandle, ReloadTicket};
use crate::site::{SiteDesiredState, validate_domain};
use crate::storage::Database;

const CONFIG_EXTENSION: &str = "conf";

/// Result of regenerating a single site.
#[derive(Debug)]
pub struct RegenerationOutcome {
    pub site_id: i64,
    /// Written file, or `None` when a disabled site's file was removed.
    pub path: Option<PathBuf>,
    pub reload: ReloadTicket,
}

/// One site that could not be regenerated.
#[derive(Debug, Clone, Serialize)]
pub struct SiteFailure {
    pub site_id: i64,
    pub domain: String,
    pub error: String,
}

/// Result of a fleet pass. Failures of individual sites do not abort it.
#[derive(Debug, Serialize)]
pub struct RegenerationReport {
    pub success: usize,
    pub failed: usize,
    pub failures: Vec<SiteFailure>,
    pub orphans_removed: Vec<String>,
    #[serde(skip)]
    pub reload: Option<ReloadTicket>,
}

/// Writes one config file per enabled site into the sites directory.
#[derive(Debug, Clone)]
pub struct ConfigRegenerator {
    db: Database,
    sites_dir: PathBuf,
    certs: CertLayout,
    acme_webroot: PathBuf,
    locks: ArtifactLocks,
    reload: ReloadHandle,
}

impl ConfigRegenerator {
    pub const fn new(
        db: Database,
        sites_dir: PathBuf,
        certs: CertLayout,
        acme_webroot: PathBuf,
        locks: ArtifactLocks,
        reload: ReloadHandle,
    ) -> Self {
        Self {
            db,
            sites_dir,
            certs,
            acme_webroot,
            locks,
            reload,
        }
    }

    pub fn sites_dir(&self) -> &Path {
        &self.sites_dir
    }

    /// Generated file for `domain`.
    pub fn config_path(&self, domain: &str) -> PathBuf {
        self.sites_dir.join(format!("{domain}.{CONFIG_EXTENSION}"))
    }

    fn render(&self, site: &SiteDesiredState) -> String {
        render_site(
            site,
            &RenderContext {
                certs: &self.certs,
                acme_webroot: &self.acme_webroot,
                cert_available: self.certs.is_installed(&site.domain),
            },
        )
    }

    async fn write_site(&self, site: &SiteDesiredState) -> ControlResult<PathBuf> {
        let path = self.config_path(&site.domain);
        let rendered = self.render(site);
        let _guard = self.locks.lock(&path).await;
        artifacts::write_atomic(&path, rendered.as_bytes(), PUBLIC_MODE)?;
        Ok(path)
    }

    async fn remove_path(&self, path: &Path) -> ControlResult<bool> {
        let _guard = self.locks.lock(path).await;
        Ok(artifacts::remove_file(path)?)
    }

    /// Regenerate one site and request a reload.
    ///
    /// A disabled site has its file removed instead.
    pub async fn regenerate_one(&self, site_id: i64) -> ControlResult<RegenerationOutcome> {
        let row = self.db.get_site(site_id).await?;

        let path = if row.enabled {
            let site = SiteDesiredState::try_from(row)?;
            let path = self.write_site(&site).await?;
            info!(site_id, domain = %site.domain, path = %path.display(), "Site config regenerated");
            Some(path)
        } else {
            validate_domain(&row.domain)?;
            let path = self.config_path(&row.domain);
            if self.remove_path(&path).await? {
                info!(site_id, domain = %row.domain, "Removed config of disabled site");
            }
            None
        };

        Ok(RegenerationOutcome {
            site_id,
            path,
            reload: self.reload.request_reload(),
        })
    }

    /// Regenerate the site serving `domain`, if there is one.
    pub async fn regenerate_domain(&self, domain: &str) -> ControlResult<Option<RegenerationOutcome>> {
        match self.db.find_site_by_domain(domain).await? {
            Some(row) => self.regenerate_one(row.id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Regenerate every enabled site, then request exactly one reload.
    pub async fn regenerate_all(&self) -> ControlResult<RegenerationReport> {
        let rows = self.db.list_enabled_sites().await?;
        let enabled: HashSet<String> = rows.iter().map(|r| r.domain.clone()).collect();
        let orphans_removed = self.remove_orphans(&enabled).await?;

        let mut success = 0;
        let mut failures = Vec::new();
        for row in rows {
            let (site_id, domain) = (row.id, row.domain.clone());
            let result = match SiteDesiredState::try_from(row) {
                Ok(site) => self.write_site(&site).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => success += 1,
                Err(e) => {
                    warn!(site_id, domain = %domain, error = %e, "Site regeneration failed");
                    failures.push(SiteFailure {
                        site_id,
                        domain,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            success,
            failed = failures.len(),
            orphans = orphans_removed.len(),
            "Fleet regeneration finished"
        );

        Ok(RegenerationReport {
            success,
            failed: failures.len(),
            failures,
            orphans_removed,
            reload: Some(self.reload.request_reload()),
        })
    }

    /// Render a site's config without writing it.
    pub async fn preview(&self, site_id: i64) -> ControlResult<String> {
        let site = SiteDesiredState::try_from(self.db.get_site(site_id).await?)?;
        Ok(self.render(&site))
    }

    /// Remove the generated file for `domain`. Requests a reload only when
    /// a file was actually removed.
    pub async fn remove_site_config(&self, domain: &str) -> ControlResult<Option<ReloadTicket>> {
        validate_domain(domain)?;
        let path = self.config_path(domain);
        if self.remove_path(&path).await? {
            info!(domain, "Site config removed");
            Ok(Some(self.reload.request_reload()))
        } else {
            Ok(None)
        }
    }

    /// Remove generated files whose domain is not an enabled site.
    pub async fn cleanup_orphans(&self) -> ControlResult<Vec<String>> {
        let enabled: HashSet<String> = self
            .db
            .list_enabled_sites()
            .await?
            .into_iter()
            .map(|r| r.domain)
            .collect();
        self.remove_orphans(&enabled).await
    }

    async fn remove_orphans(&self, enabled: &HashSet<String>) -> ControlResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.sites_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ControlError::Artifact(artifacts::ArtifactError::Read {
                    path: self.sites_dir.display().to_string(),
                    reason: e.to_string(),
                }));
            }
        };

        let mut removed = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXTENSION) {
                continue;
            }
            let Some(domain) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if domain.starts_with('.') || enabled.contains(domain) {
                continue;
            }
            if self.remove_path(&path).await? {
                info!(domain, "Removed orphaned site config");
                removed.push(domain.to_string());
            }
        }
        removed.sort();
        Ok(removed)
    }
}
