//! Certificate state queries.

use catwaf_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{CertState, CertificateRow};

impl Database {
    /// Get the certificate state row for `domain`, if one exists.
    pub async fn get_certificate(&self, domain: &str) -> Result<Option<CertificateRow>, DatabaseError> {
        let row = sqlx::query_as::<_, CertificateRow>("SELECT * FROM certificates WHERE domain = ?")
            .bind(domain)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// Record that issuance has been queued as `job_id`.
    pub async fn mark_certificate_issuing(
        &self,
        domain: &str,
        challenge_type: &str,
        job_id: i64,
    ) -> Result<(), DatabaseError> {
        self.upsert_certificate(domain, CertState::Issuing, challenge_type, Some(job_id), None)
            .await
    }

    /// Record a failed issuance.
    pub async fn mark_certificate_failed(
        &self,
        domain: &str,
        challenge_type: &str,
        error: &str,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO certificates (domain, state, challenge_type, last_error, updated_at)
            VALUES (?, 'failed', ?, ?, ?)
            ON CONFLICT (domain) DO UPDATE SET
                state = 'failed',
                challenge_type = excluded.challenge_type,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            ",
        )
        .bind(domain)
        .bind(challenge_type)
        .bind(error)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Record installed material and its validity window.
    pub async fn mark_certificate_installed(
        &self,
        domain: &str,
        challenge_type: &str,
        not_before: i64,
        not_after: i64,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO certificates (domain, state, challenge_type, not_before, not_after, updated_at)
            VALUES (?, 'installed', ?, ?, ?, ?)
            ON CONFLICT (domain) DO UPDATE SET
                state = 'installed',
                challenge_type = excluded.challenge_type,
                last_error = NULL,
                not_before = excluded.not_before,
                not_after = excluded.not_after,
                updated_at = excluded.updated_at
            ",
        )
        .bind(domain)
        .bind(challenge_type)
        .bind(not_before)
        .bind(not_after)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn upsert_certificate(
        &self,
        domain: &str,
        state: CertState,
        challenge_type: &str,
        job_id: Option<i64>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO certificates (domain, state, challenge_type, job_id, last_error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (domain) DO UPDATE SET
                state = excluded.state,
                challenge_type = excluded.challenge_type,
                job_id = excluded.job_id,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            ",
        )
        .bind(domain)
        .bind(state.as_str())
        .bind(challenge_type)
        .bind(job_id)
        .bind(error)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fail issuance records whose job already reached `failed`, e.g. after
    /// a restart interrupted it. Returns the number of rows changed.
    pub async fn fail_orphaned_issuance(&self) -> Result<u64, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE certificates
            SET state = 'failed',
                last_error = COALESCE((SELECT error FROM jobs WHERE jobs.id = certificates.job_id), 'issuance job lost'),
                updated_at = ?
            WHERE state = 'issuing'
              AND (job_id IS NULL OR job_id NOT IN (SELECT id FROM jobs WHERE status IN ('pending', 'running')))
            ",
        )
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete the state row for `domain`. Returns whether a row existed.
    pub async fn delete_certificate(&self, domain: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM certificates WHERE domain = ?")
            .bind(domain)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Automatically issued certificates with material expiring before
    /// `before`. Failed renewals are included so they are retried.
    pub async fn certificates_expiring_before(
        &self,
        before: i64,
    ) -> Result<Vec<CertificateRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            r"
            SELECT * FROM certificates
            WHERE state IN ('installed', 'failed')
              AND challenge_type IN ('http-01', 'dns-01')
              AND not_after IS NOT NULL
              AND not_after < ?
            ORDER BY not_after ASC
            ",
        )
        .bind(before)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
