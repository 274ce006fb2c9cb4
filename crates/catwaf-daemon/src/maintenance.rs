//! Periodic housekeeping: expired-ban sweep and certificate renewal scan.

use std::time::Duration;

use catwaf_core::config::MaintenanceConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::banlist::BanListSynchronizer;
use crate::certs::CertificateManager;

/// Result of one sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: Vec<String>,
}

/// Release expired bans. Waits for the reload when the artifact changed.
pub async fn sweep_bans(bans: &BanListSynchronizer) -> SweepReport {
    match bans.sweep_expired().await {
        Ok((released, reload)) => {
            if let Some(ticket) = reload
                && let Some(warning) = ticket.wait().await.warning()
            {
                error!(warning = %warning, "Reload after ban sweep failed");
            }
            SweepReport { released }
        }
        Err(e) => {
            error!(error = %e, "Expired-ban sweep failed");
            SweepReport::default()
        }
    }
}

/// Queue renewals for certificates inside the threshold.
pub async fn scan_renewals(certs: &CertificateManager, threshold_days: i64) -> Vec<i64> {
    match certs.enqueue_renewals(threshold_days).await {
        Ok(jobs) => {
            if jobs.is_empty() {
                info!("Certificate renewal scan: nothing due");
            }
            jobs
        }
        Err(e) => {
            error!(error = %e, "Certificate renewal scan failed");
            Vec::new()
        }
    }
}

/// Spawn the housekeeping loop. Both timers fire once at startup.
pub fn spawn_maintenance(
    bans: BanListSynchronizer,
    certs: CertificateManager,
    config: MaintenanceConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(Duration::from_secs(config.ban_sweep_secs.max(1)));
        let mut renew = tokio::time::interval(Duration::from_secs(config.renewal_check_secs.max(1)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        renew.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            ban_sweep_secs = config.ban_sweep_secs,
            renewal_check_secs = config.renewal_check_secs,
            "Maintenance loop started"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    sweep_bans(&bans).await;
                }
                _ = renew.tick() => {
                    scan_renewals(&certs, config.renewal_threshold_days).await;
                }
                _ = shutdown.changed() => {
                    info!("Maintenance loop shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use catwaf_core::db::unix_timestamp;

    use super::*;
    use crate::banlist::{BanRequest, MANUAL_JAIL};
    use crate::testing::Harness;

    #[tokio::test]
    async fn sweep_reports_released_addresses() {
        let h = Harness::new().await;
        h.bans.ban(BanRequest::new("192.0.2.50")).await.unwrap();
        h.db.upsert_ban("192.0.2.51", "old", MANUAL_JAIL, Some(10), unix_timestamp() - 60, false)
            .await
            .unwrap();

        let report = sweep_bans(&h.bans).await;
        assert_eq!(report.released, ["192.0.2.51"]);
        assert!(sweep_bans(&h.bans).await.released.is_empty());
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let h = Harness::new().await;
        let (tx, rx) = watch::channel(false);
        let handle = spawn_maintenance(
            h.bans.clone(),
            h.certs.clone(),
            MaintenanceConfig::default(),
            rx,
        );
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
