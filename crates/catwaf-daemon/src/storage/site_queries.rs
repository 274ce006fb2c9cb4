//! Site desired-state queries.

use catwaf_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{SiteInput, SiteRow};

impl Database {
    /// Insert a new site.
    pub async fn insert_site(&self, input: &SiteInput) -> Result<SiteRow, DatabaseError> {
        let now = unix_timestamp();

        let site = sqlx::query_as::<_, SiteRow>(
            r"
            INSERT INTO sites (
                domain, enabled, backends, lb_method,
                health_check_enabled, health_check_interval, health_check_path,
                ssl_enabled, ssl_challenge_type, dns_credential, wildcard_subdomains,
                robots_txt, security_txt, humans_txt, ads_txt,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            ",
        )
        .bind(&input.domain)
        .bind(input.enabled)
        .bind(input.backends.to_string())
        .bind(&input.lb_method)
        .bind(input.health_check_enabled)
        .bind(input.health_check_interval)
        .bind(&input.health_check_path)
        .bind(input.ssl_enabled)
        .bind(&input.ssl_challenge_type)
        .bind(&input.dns_credential)
        .bind(input.wildcard_subdomains)
        .bind(&input.robots_txt)
        .bind(&input.security_txt)
        .bind(&input.humans_txt)
        .bind(&input.ads_txt)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(site)
    }

    /// Replace every writable field of an existing site.
    pub async fn update_site(&self, id: i64, input: &SiteInput) -> Result<SiteRow, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query_as::<_, SiteRow>(
            r"
            UPDATE sites SET
                domain = ?, enabled = ?, backends = ?, lb_method = ?,
                health_check_enabled = ?, health_check_interval = ?, health_check_path = ?,
                ssl_enabled = ?, ssl_challenge_type = ?, dns_credential = ?, wildcard_subdomains = ?,
                robots_txt = ?, security_txt = ?, humans_txt = ?, ads_txt = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            ",
        )
        .bind(&input.domain)
        .bind(input.enabled)
        .bind(input.backends.to_string())
        .bind(&input.lb_method)
        .bind(input.health_check_enabled)
        .bind(input.health_check_interval)
        .bind(&input.health_check_path)
        .bind(input.ssl_enabled)
        .bind(&input.ssl_challenge_type)
        .bind(&input.dns_credential)
        .bind(input.wildcard_subdomains)
        .bind(&input.robots_txt)
        .bind(&input.security_txt)
        .bind(&input.humans_txt)
        .bind(&input.ads_txt)
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Site {id}")))
    }

    /// Get a site by ID.
    pub async fn get_site(&self, id: i64) -> Result<SiteRow, DatabaseError> {
        sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Site {id}")))
    }

    /// Get a site by domain.
    pub async fn find_site_by_domain(&self, domain: &str) -> Result<Option<SiteRow>, DatabaseError> {
        let site = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE domain = ?")
            .bind(domain)
            .fetch_optional(self.pool())
            .await?;

        Ok(site)
    }

    /// Enabled sites in regeneration order: exact domains before wildcard
    /// ones, longer (more specific) domains first.
    pub async fn list_enabled_sites(&self) -> Result<Vec<SiteRow>, DatabaseError> {
        let sites = sqlx::query_as::<_, SiteRow>(
            "SELECT * FROM sites WHERE enabled = 1 ORDER BY wildcard_subdomains ASC, LENGTH(domain) DESC, domain ASC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sites)
    }

    /// Every stored site, enabled or not.
    pub async fn list_sites(&self) -> Result<Vec<SiteRow>, DatabaseError> {
        let sites = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites ORDER BY domain ASC")
            .fetch_all(self.pool())
            .await?;

        Ok(sites)
    }

    /// Toggle TLS for the site serving `domain`. Returns the site id, if any.
    pub async fn set_site_ssl(
        &self,
        domain: &str,
        enabled: bool,
        challenge_type: Option<&str>,
    ) -> Result<Option<i64>, DatabaseError> {
        let now = unix_timestamp();

        let row: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE sites
            SET ssl_enabled = ?, ssl_challenge_type = COALESCE(?, ssl_challenge_type), updated_at = ?
            WHERE domain = ?
            RETURNING id
            ",
        )
        .bind(enabled)
        .bind(challenge_type)
        .bind(now)
        .bind(domain)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Delete a site.
    pub async fn delete_site(&self, id: i64) -> Result<SiteRow, DatabaseError> {
        sqlx::query_as::<_, SiteRow>("DELETE FROM sites WHERE id = ? RETURNING *")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Site {id}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn insert_and_update_site() {
        let db = Database::open_in_memory().await.unwrap();
        let mut input = SiteInput::new("example.test", json!([{"address": "10.0.0.1"}]));
        let site = db.insert_site(&input).await.unwrap();

        assert_eq!(site.domain, "example.test");
        assert!(site.enabled);
        assert_eq!(site.lb_method, "round_robin");

        input.lb_method = "least_conn".to_string();
        let updated = db.update_site(site.id, &input).await.unwrap();
        assert_eq!(updated.lb_method, "least_conn");

        let err = db.update_site(site.id + 100, &input).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn enabled_sites_are_ordered_for_regeneration() {
        let db = Database::open_in_memory().await.unwrap();
        let mut wildcard = SiteInput::new("wild.test", json!([]));
        wildcard.wildcard_subdomains = true;
        db.insert_site(&wildcard).await.unwrap();
        db.insert_site(&SiteInput::new("a.test", json!([]))).await.unwrap();
        db.insert_site(&SiteInput::new("long.example.test", json!([])))
            .await
            .unwrap();
        let mut disabled = SiteInput::new("off.test", json!([]));
        disabled.enabled = false;
        db.insert_site(&disabled).await.unwrap();

        let domains: Vec<_> = db
            .list_enabled_sites()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.domain)
            .collect();
        assert_eq!(domains, ["long.example.test", "a.test", "wild.test"]);
        assert_eq!(db.list_sites().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn set_site_ssl_by_domain() {
        let db = Database::open_in_memory().await.unwrap();
        let site = db
            .insert_site(&SiteInput::new("example.test", json!([])))
            .await
            .unwrap();

        let id = db
            .set_site_ssl("example.test", true, Some("custom"))
            .await
            .unwrap();
        assert_eq!(id, Some(site.id));

        let site = db.get_site(site.id).await.unwrap();
        assert!(site.ssl_enabled);
        assert_eq!(site.ssl_challenge_type, "custom");
        assert_eq!(db.set_site_ssl("nope.test", true, None).await.unwrap(), None);
    }
}
