//! Ban records and the deny-list artifact, kept in step.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use catwaf_core::db::unix_timestamp;
use ipnet::IpNet;
use tracing::{info, warn};

use super::denylist::{self, Edit};
use crate::artifacts::{self, ArtifactLocks, PUBLIC_MODE};
use crate::error::{ControlError, ControlResult};
use crate::reload::{ReloadHandle, ReloadTicket};
use crate::storage::{BanFilter, BanRecord, Database};

/// Ban length when the caller gives none, in seconds.
pub const DEFAULT_BAN_DURATION: i64 = 3600;

/// Longest timed ban, in seconds (ten years).
pub const MAX_BAN_DURATION: i64 = 10 * 365 * 24 * 3600;

/// Source tag for bans placed through the admin API.
pub const MANUAL_JAIL: &str = "manual";

/// Source tag for bans placed by the automatic banner.
pub const AUTO_BAN_JAIL: &str = "auto-ban";

const DEFAULT_REASON: &str = "Manual ban";

/// Input to [`BanListSynchronizer::ban`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct BanRequest {
    #[serde(default, alias = "ip_address")]
    pub ip: String,
    pub reason: Option<String>,
    pub jail: Option<String>,
    /// Seconds. Ignored for permanent bans.
    pub duration: Option<i64>,
    #[serde(default)]
    pub permanent: bool,
}

impl BanRequest {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub const fn duration(mut self, secs: i64) -> Self {
        self.duration = Some(secs);
        self
    }

    #[must_use]
    pub const fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }
}

/// Result of a ban.
#[derive(Debug)]
pub struct BanOutcome {
    pub record: BanRecord,
    /// Whether the artifact text changed.
    pub artifact_changed: bool,
    pub reload: ReloadTicket,
}

/// Result of an unban.
#[derive(Debug)]
pub struct UnbanOutcome {
    pub record: BanRecord,
    pub artifact_changed: bool,
    pub reload: ReloadTicket,
}

/// Normalise an address or CIDR block; rejects anything else.
fn normalize_ip(raw: &str) -> ControlResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ControlError::validation("ip is required"));
    }
    if let Ok(addr) = raw.parse::<IpAddr>() {
        return Ok(addr.to_string());
    }
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net.trunc().to_string());
    }
    Err(ControlError::validation(format!("invalid IP address: {raw}")))
}

/// Lookup key for an existing ban: addresses and blocks in their stored
/// form, anything else (a record id) as given.
fn lookup_key(raw: &str) -> String {
    let raw = raw.trim();
    normalize_ip(raw).unwrap_or_else(|_| raw.to_string())
}

fn validate_jail(jail: &str) -> ControlResult<()> {
    let ok = !jail.is_empty()
        && jail.len() <= 64
        && jail
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ControlError::validation(format!("invalid jail: {jail}")))
    }
}

/// Owns the deny-list artifact.
#[derive(Debug, Clone)]
pub struct BanListSynchronizer {
    db: Database,
    path: PathBuf,
    locks: ArtifactLocks,
    reload: ReloadHandle,
}

impl BanListSynchronizer {
    pub const fn new(db: Database, path: PathBuf, locks: ArtifactLocks, reload: ReloadHandle) -> Self {
        Self {
            db,
            path,
            locks,
            reload,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ban an address, or refresh an existing ban in place.
    pub async fn ban(&self, request: BanRequest) -> ControlResult<BanOutcome> {
        let ip = normalize_ip(&request.ip)?;
        let jail = request.jail.as_deref().unwrap_or(MANUAL_JAIL);
        validate_jail(jail)?;
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REASON);
        let duration = if request.permanent {
            None
        } else {
            let secs = request.duration.unwrap_or(DEFAULT_BAN_DURATION);
            if secs <= 0 {
                return Err(ControlError::validation("duration must be positive"));
            }
            if secs > MAX_BAN_DURATION {
                return Err(ControlError::validation(format!(
                    "duration exceeds {MAX_BAN_DURATION} seconds, use a permanent ban"
                )));
            }
            Some(secs)
        };

        let _guard = self.locks.lock(&self.path).await;
        let now = unix_timestamp();
        let record = self
            .db
            .upsert_ban(&ip, reason, jail, duration, now, request.permanent)
            .await?;

        let artifact_changed = match artifacts::read_optional(&self.path)? {
            Some(text) => match denylist::insert(&text, &ip) {
                Edit::Unchanged => false,
                Edit::Changed(updated) => {
                    artifacts::write_atomic(&self.path, updated.as_bytes(), PUBLIC_MODE)?;
                    true
                }
                Edit::Malformed => {
                    warn!(path = %self.path.display(), "Deny-list has no closing marker, rebuilding");
                    self.rebuild_locked(now).await?
                }
            },
            None => self.rebuild_locked(now).await?,
        };

        info!(
            ip = %record.ip_address,
            jail = %record.jail,
            permanent = record.is_permanent,
            expires_at = ?record.expires_at,
            "IP banned"
        );
        Ok(BanOutcome {
            record,
            artifact_changed,
            reload: self.reload.request_reload(),
        })
    }

    /// Lift a ban by IP address or record id.
    ///
    /// An unknown target is [`ControlError::NotFound`] and leaves the
    /// artifact untouched.
    pub async fn unban(&self, ip_or_id: &str) -> ControlResult<UnbanOutcome> {
        let key = lookup_key(ip_or_id);
        if key.is_empty() {
            return Err(ControlError::validation("ip or id is required"));
        }

        let _guard = self.locks.lock(&self.path).await;
        let record = self
            .db
            .find_ban(&key)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("Ban {key}")))?;
        self.db.delete_ban(record.id).await?;

        let artifact_changed = match artifacts::read_optional(&self.path)? {
            Some(text) => match denylist::remove(&text, &record.ip_address) {
                Edit::Changed(updated) => {
                    artifacts::write_atomic(&self.path, updated.as_bytes(), PUBLIC_MODE)?;
                    true
                }
                Edit::Unchanged | Edit::Malformed => false,
            },
            None => self.rebuild_locked(unix_timestamp()).await?,
        };

        info!(ip = %record.ip_address, "IP unbanned");
        Ok(UnbanOutcome {
            record,
            artifact_changed,
            reload: self.reload.request_reload(),
        })
    }

    /// Bans from the automatic banner placed within the trailing `window`.
    pub async fn auto_ban_count(&self, window: Duration) -> ControlResult<i64> {
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        let since = unix_timestamp().saturating_sub(window);
        Ok(self.db.count_bans_since(AUTO_BAN_JAIL, since).await?)
    }

    pub async fn list(&self, filter: BanFilter) -> ControlResult<Vec<BanRecord>> {
        Ok(self.db.list_bans(filter, unix_timestamp()).await?)
    }

    pub async fn get(&self, ip_or_id: &str) -> ControlResult<BanRecord> {
        self.db
            .find_ban(&lookup_key(ip_or_id))
            .await?
            .ok_or_else(|| ControlError::not_found(format!("Ban {ip_or_id}")))
    }

    /// Delete expired bans and drop them from the artifact.
    ///
    /// Returns the released addresses and, when anything changed, the
    /// reload ticket.
    pub async fn sweep_expired(&self) -> ControlResult<(Vec<String>, Option<ReloadTicket>)> {
        let _guard = self.locks.lock(&self.path).await;
        let now = unix_timestamp();
        let released = self.db.delete_expired_bans(now).await?;
        if released.is_empty() {
            return Ok((released, None));
        }

        self.rebuild_locked(now).await?;
        info!(count = released.len(), "Expired bans released");
        Ok((released, Some(self.reload.request_reload())))
    }

    /// Rebuild the artifact from every active ban.
    pub async fn resync(&self) -> ControlResult<Option<ReloadTicket>> {
        let _guard = self.locks.lock(&self.path).await;
        let changed = self.rebuild_locked(unix_timestamp()).await?;
        Ok(changed.then(|| self.reload.request_reload()))
    }

    /// Caller holds the artifact lock.
    async fn rebuild_locked(&self, now: i64) -> ControlResult<bool> {
        let ips = self.db.active_ban_ips(now).await?;
        let rendered = denylist::render(&ips);
        if artifacts::read_optional(&self.path)?.as_deref() == Some(rendered.as_str()) {
            return Ok(false);
        }
        artifacts::write_atomic(&self.path, rendered.as_bytes(), PUBLIC_MODE)?;
        info!(path = %self.path.display(), entries = ips.len(), "Deny-list rebuilt");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[test]
    fn ip_normalisation() {
        assert_eq!(normalize_ip(" 203.0.113.5 ").unwrap(), "203.0.113.5");
        assert_eq!(normalize_ip("2001:DB8::1").unwrap(), "2001:db8::1");
        assert_eq!(normalize_ip("10.1.2.3/8").unwrap(), "10.0.0.0/8");
        assert!(normalize_ip("").is_err());
        assert!(normalize_ip("1.2.3.4; include /etc/passwd").is_err());
    }

    #[tokio::test]
    async fn ban_scenario_sets_expiry_and_is_idempotent() {
        let h = Harness::new().await;
        let before = unix_timestamp();

        let first = h
            .bans
            .ban(BanRequest::new("203.0.113.5").reason("brute force").duration(3600))
            .await
            .unwrap();
        assert!(!first.record.is_permanent);
        let expires = first.record.expires_at.unwrap();
        assert!((before + 3600..=unix_timestamp() + 3600).contains(&expires));
        assert!(first.artifact_changed);

        let second = h
            .bans
            .ban(BanRequest::new("203.0.113.5").reason("brute force again").duration(3600))
            .await
            .unwrap();
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.reason, "brute force again");
        assert!(!second.artifact_changed);

        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert_eq!(text.matches("203.0.113.5 1;").count(), 1);
        assert_eq!(h.bans.list(BanFilter::All).await.unwrap().len(), 1);

        second.reload.wait().await;
        assert_eq!(h.reload.requested(), 2);
    }

    #[tokio::test]
    async fn permanent_ban_ignores_duration() {
        let h = Harness::new().await;
        let outcome = h
            .bans
            .ban(BanRequest::new("198.51.100.7").duration(60).permanent())
            .await
            .unwrap();
        assert!(outcome.record.is_permanent);
        assert!(outcome.record.expires_at.is_none());
    }

    #[tokio::test]
    async fn invalid_input_mutates_nothing() {
        let h = Harness::new().await;
        assert!(matches!(
            h.bans.ban(BanRequest::new("not-an-ip")).await,
            Err(ControlError::Validation(_))
        ));
        assert!(matches!(
            h.bans.ban(BanRequest::new("192.0.2.1").duration(0)).await,
            Err(ControlError::Validation(_))
        ));
        assert!(!h.bans.path().exists());
        assert_eq!(h.reload.requested(), 0);
    }

    #[tokio::test]
    async fn unban_unknown_leaves_artifact_byte_identical() {
        let h = Harness::new().await;
        h.bans.ban(BanRequest::new("192.0.2.1")).await.unwrap();
        let before = std::fs::read(h.bans.path()).unwrap();
        let requested = h.reload.requested();

        let err = h.bans.unban("192.0.2.99").await.unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
        assert_eq!(std::fs::read(h.bans.path()).unwrap(), before);
        assert_eq!(h.reload.requested(), requested);
    }

    #[tokio::test]
    async fn unban_by_ip_and_by_id() {
        let h = Harness::new().await;
        h.bans.ban(BanRequest::new("1.2.3.4")).await.unwrap();
        let other = h.bans.ban(BanRequest::new("1.2.3.45")).await.unwrap();

        let outcome = h.bans.unban("1.2.3.4").await.unwrap();
        assert!(outcome.artifact_changed);
        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert!(!denylist::contains(&text, "1.2.3.4"));
        assert!(denylist::contains(&text, "1.2.3.45"));

        h.bans.unban(&other.record.id.to_string()).await.unwrap();
        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert_eq!(text, denylist::render::<&str>(&[]));
    }

    #[tokio::test]
    async fn unban_and_get_accept_any_spelling_of_the_address() {
        let h = Harness::new().await;
        h.bans.ban(BanRequest::new("2001:db8::1")).await.unwrap();
        h.bans.ban(BanRequest::new("10.0.0.0/8")).await.unwrap();

        let found = h.bans.get(" 2001:DB8:0::1 ").await.unwrap();
        assert_eq!(found.ip_address, "2001:db8::1");

        let outcome = h.bans.unban("2001:DB8::1").await.unwrap();
        assert_eq!(outcome.record.ip_address, "2001:db8::1");
        let outcome = h.bans.unban("10.1.2.3/8").await.unwrap();
        assert_eq!(outcome.record.ip_address, "10.0.0.0/8");

        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert_eq!(text, denylist::render::<&str>(&[]));
    }

    #[tokio::test]
    async fn oversized_duration_is_rejected() {
        let h = Harness::new().await;
        for secs in [MAX_BAN_DURATION + 1, i64::MAX] {
            let err = h
                .bans
                .ban(BanRequest::new("192.0.2.1").duration(secs))
                .await
                .unwrap_err();
            assert!(matches!(err, ControlError::Validation(_)), "{secs}");
        }
        assert!(!h.bans.path().exists());

        let longest = h
            .bans
            .ban(BanRequest::new("192.0.2.1").duration(MAX_BAN_DURATION))
            .await
            .unwrap();
        assert!(longest.record.expires_at.unwrap() > unix_timestamp());
    }

    #[tokio::test]
    async fn malformed_artifact_is_rebuilt() {
        let h = Harness::new().await;
        std::fs::write(h.bans.path(), "geo $ban {\n    default 0;\n").unwrap();

        h.bans.ban(BanRequest::new("192.0.2.7")).await.unwrap();
        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert_eq!(text, denylist::render(&["192.0.2.7"]));
    }

    #[tokio::test]
    async fn auto_ban_count_uses_jail_and_window() {
        let h = Harness::new().await;
        let mut auto = BanRequest::new("192.0.2.1");
        auto.jail = Some(AUTO_BAN_JAIL.to_string());
        h.bans.ban(auto).await.unwrap();
        h.bans.ban(BanRequest::new("192.0.2.2")).await.unwrap();

        let count = h
            .bans
            .auto_ban_count(Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn sweep_releases_expired_bans() {
        let h = Harness::new().await;
        h.db.upsert_ban("192.0.2.1", "old", MANUAL_JAIL, Some(10), unix_timestamp() - 100, false)
            .await
            .unwrap();
        h.bans.ban(BanRequest::new("192.0.2.2")).await.unwrap();
        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert!(!denylist::contains(&text, "192.0.2.1"));

        // Put the stale entry into the artifact by hand, as a crashed run would.
        let Edit::Changed(stale) = denylist::insert(&text, "192.0.2.1") else {
            panic!("insert should change the text");
        };
        std::fs::write(h.bans.path(), stale).unwrap();

        let (released, ticket) = h.bans.sweep_expired().await.unwrap();
        assert_eq!(released, ["192.0.2.1"]);
        assert!(ticket.is_some());
        let text = std::fs::read_to_string(h.bans.path()).unwrap();
        assert_eq!(text, denylist::render(&["192.0.2.2"]));

        let (released, ticket) = h.bans.sweep_expired().await.unwrap();
        assert!(released.is_empty());
        assert!(ticket.is_none());
    }

    #[tokio::test]
    async fn resync_only_reloads_on_change() {
        let h = Harness::new().await;
        h.bans.ban(BanRequest::new("192.0.2.2")).await.unwrap();
        assert!(h.bans.resync().await.unwrap().is_none());

        std::fs::write(h.bans.path(), "junk").unwrap();
        assert!(h.bans.resync().await.unwrap().is_some());
        assert_eq!(
            std::fs::read_to_string(h.bans.path()).unwrap(),
            denylist::render(&["192.0.2.2"])
        );
    }
}
