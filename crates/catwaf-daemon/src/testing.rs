//! Shared fixture for unit tests: every component over an in-memory store
//! and a temporary directory tree.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use catwaf_core::Config;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;

use crate::banlist::BanListSynchronizer;
use crate::certs::CertificateManager;
use crate::control::ControlPlane;
use crate::gateway::ProcessGateway;
use crate::queue::{JobQueue, Worker};
use crate::regen::ConfigRegenerator;
use crate::reload::{ReloadCoordinator, ReloadHandle, ReloadPolicy};
use crate::storage::{Database, SiteInput, SiteRow};

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub reload: ReloadHandle,
    pub queue: JobQueue,
    pub bans: BanListSynchronizer,
    pub regen: ConfigRegenerator,
    pub certs: CertificateManager,
    pub worker: Worker,
    _shutdown: watch::Sender<bool>,
}

/// Configuration rooted at `root`, with no issuance grace period.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.sites_dir = root.join("sites");
    config.paths.banlist_path = root.join("banlist.conf");
    config.paths.certs_dir = root.join("certs");
    config.paths.acme_dir = root.join("letsencrypt");
    config.paths.acme_webroot = root.join("webroot");
    config.reload.sentinel_path = root.join("sites/.reload_needed");
    config.acme.grace_secs = 0;
    config.acme.dns_credential = None;
    config
}

impl Harness {
    /// Sentinel-mode reloads with no debounce.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("sites/.reload_needed");
        Self::build(dir, ReloadPolicy::Sentinel(sentinel)).await
    }

    pub async fn with_reload(policy: ReloadPolicy) -> Self {
        Self::build(tempfile::tempdir().unwrap(), policy).await
    }

    async fn build(dir: TempDir, policy: ReloadPolicy) -> Self {
        let config = test_config(dir.path());
        let db = Database::open_in_memory().await.unwrap();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (coordinator, reload) =
            ReloadCoordinator::new(policy, Duration::ZERO, ProcessGateway::new());
        coordinator.spawn(shutdown_rx);

        let plane = ControlPlane::assemble(db, &config, reload);
        let worker = plane.worker(Duration::from_millis(10));

        Self {
            dir,
            config,
            db: plane.db,
            reload: plane.reload,
            queue: plane.queue,
            bans: plane.bans,
            regen: plane.regen,
            certs: plane.certs,
            worker,
            _shutdown: shutdown,
        }
    }

    /// Insert an enabled HTTP site with one backend.
    pub async fn add_site(&self, domain: &str) -> SiteRow {
        self.db
            .insert_site(&SiteInput::new(domain, json!([{"address": "10.0.0.1", "port": 8080}])))
            .await
            .unwrap()
    }
}
