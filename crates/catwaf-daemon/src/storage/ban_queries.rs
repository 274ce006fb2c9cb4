//! Ban record queries.

use super::db::{Database, DatabaseError};
use super::models::{BanFilter, BanRecord};

/// Upper bound on rows returned by ban listings.
pub const BAN_LIST_LIMIT: i64 = 1000;

impl Database {
    /// Insert or update the ban for `ip_address`.
    ///
    /// An existing record keeps its id and jail; reason, duration, expiry and
    /// permanence are replaced. Permanent bans never carry an expiry.
    pub async fn upsert_ban(
        &self,
        ip_address: &str,
        reason: &str,
        jail: &str,
        ban_duration: Option<i64>,
        banned_at: i64,
        is_permanent: bool,
    ) -> Result<BanRecord, DatabaseError> {
        let (ban_duration, expires_at) = if is_permanent {
            (None, None)
        } else {
            (ban_duration, ban_duration.map(|d| banned_at.saturating_add(d)))
        };

        let record = sqlx::query_as::<_, BanRecord>(
            r"
            INSERT INTO bans (ip_address, reason, jail, ban_duration, banned_at, expires_at, is_permanent)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ip_address) DO UPDATE SET
                reason = excluded.reason,
                ban_duration = excluded.ban_duration,
                banned_at = excluded.banned_at,
                expires_at = excluded.expires_at,
                is_permanent = excluded.is_permanent
            RETURNING *
            ",
        )
        .bind(ip_address)
        .bind(reason)
        .bind(jail)
        .bind(ban_duration)
        .bind(banned_at)
        .bind(expires_at)
        .bind(is_permanent)
        .fetch_one(self.pool())
        .await?;

        Ok(record)
    }

    /// Find a ban by IP address, or by numeric id.
    ///
    /// An IP match wins over an id match.
    pub async fn find_ban(&self, ip_or_id: &str) -> Result<Option<BanRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, BanRecord>(
            r"
            SELECT * FROM bans
            WHERE ip_address = ?1 OR CAST(id AS TEXT) = ?1
            ORDER BY ip_address = ?1 DESC
            LIMIT 1
            ",
        )
        .bind(ip_or_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(record)
    }

    /// Delete a ban by id.
    pub async fn delete_ban(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM bans WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Ban {id}")));
        }
        Ok(())
    }

    /// List bans matching `filter`, newest first.
    pub async fn list_bans(
        &self,
        filter: BanFilter,
        now: i64,
    ) -> Result<Vec<BanRecord>, DatabaseError> {
        let condition = match filter {
            BanFilter::Active => "is_permanent = 1 OR expires_at > ?1",
            BanFilter::Permanent => "is_permanent = 1 AND ?1 IS NOT NULL",
            BanFilter::Expired => "is_permanent = 0 AND (expires_at IS NULL OR expires_at <= ?1)",
            BanFilter::All => "?1 IS NOT NULL",
        };
        let sql =
            format!("SELECT * FROM bans WHERE {condition} ORDER BY banned_at DESC, id DESC LIMIT ?2");

        let records = sqlx::query_as::<_, BanRecord>(&sql)
            .bind(now)
            .bind(BAN_LIST_LIMIT)
            .fetch_all(self.pool())
            .await?;

        Ok(records)
    }

    /// Every IP that is banned at `now`, ordered for stable rendering.
    pub async fn active_ban_ips(&self, now: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT ip_address FROM bans WHERE is_permanent = 1 OR expires_at > ? ORDER BY id",
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(ip,)| ip).collect())
    }

    /// Count bans from `jail` placed at or after `since`.
    pub async fn count_bans_since(&self, jail: &str, since: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bans WHERE jail = ? AND banned_at >= ?")
                .bind(jail)
                .bind(since)
                .fetch_one(self.pool())
                .await?;

        Ok(count)
    }

    /// Delete non-permanent bans that expired at or before `now`.
    ///
    /// Returns the released IP addresses.
    pub async fn delete_expired_bans(&self, now: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "DELETE FROM bans WHERE is_permanent = 0 AND expires_at IS NOT NULL AND expires_at <= ? RETURNING ip_address",
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(ip,)| ip).collect())
    }
}
