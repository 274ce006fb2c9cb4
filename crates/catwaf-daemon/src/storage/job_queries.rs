//! Job queue queries.

use catwaf_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{Job, JobStats, JobStatus};

impl Database {
    /// Insert a pending job.
    pub async fn insert_job(
        &self,
        job_type: &str,
        payload: &str,
        priority: i64,
        max_attempts: i64,
    ) -> Result<Job, DatabaseError> {
        let now = unix_timestamp();

        let job = sqlx::query_as::<_, Job>(
            r"
            INSERT INTO jobs (job_type, payload, priority, max_attempts, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            ",
        )
        .bind(job_type)
        .bind(payload)
        .bind(priority)
        .bind(max_attempts)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(job)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: i64) -> Result<Job, DatabaseError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Job {id}")))
    }

    /// List jobs, highest priority first, newest first within a priority.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>, DatabaseError> {
        let jobs = if let Some(status) = status {
            sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs WHERE status = ? ORDER BY priority DESC, created_at DESC, id DESC LIMIT ?",
            )
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs ORDER BY priority DESC, created_at DESC, id DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        };

        Ok(jobs)
    }

    /// Delete a job.
    pub async fn delete_job(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Job {id}")));
        }
        Ok(())
    }

    /// Count jobs per status. `total` is the sum of the per-status counts.
    pub async fn job_stats(&self) -> Result<JobStats, DatabaseError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        stats.total = stats.pending + stats.running + stats.completed + stats.failed;
        Ok(stats)
    }

    /// Id of a pending or running job of `job_type` whose payload names
    /// `domain`.
    pub async fn find_active_job(
        &self,
        job_type: &str,
        domain: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r"
            SELECT id FROM jobs
            WHERE job_type = ?
              AND status IN ('pending', 'running')
              AND json_extract(payload, '$.domain') = ?
            ORDER BY id ASC
            LIMIT 1
            ",
        )
        .bind(job_type)
        .bind(domain)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(id,)| id))
    }

    // =========================================================================
    // Worker transitions
    // =========================================================================

    /// Atomically move the next runnable job to `running`.
    ///
    /// The highest priority wins, oldest first within a priority. The attempt
    /// counter is incremented as part of the claim.
    pub async fn claim_next_job(&self) -> Result<Option<Job>, DatabaseError> {
        let now = unix_timestamp();

        let job = sqlx::query_as::<_, Job>(
            r"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, started_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND attempts < max_attempts
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING *
            ",
        )
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(job)
    }

    /// Mark a running job completed.
    pub async fn complete_job(&self, id: i64, result: Option<&str>) -> Result<(), DatabaseError> {
        self.finish_job(id, JobStatus::Completed, None, result).await
    }

    /// Mark a running job failed.
    pub async fn fail_job(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        self.finish_job(id, JobStatus::Failed, Some(error), None)
            .await
    }

    async fn finish_job(
        &self,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        let updated = sqlx::query(
            "UPDATE jobs SET status = ?, error = ?, result = ?, completed_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(result)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Running job {id}")));
        }
        Ok(())
    }

    /// Return a running job to `pending` after a retryable failure.
    pub async fn requeue_job(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'pending', error = ?, started_at = NULL WHERE id = ? AND status = 'running' AND attempts < max_attempts",
        )
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Retryable job {id}")));
        }
        Ok(())
    }

    /// Recover jobs left `running` by a previous process.
    ///
    /// Jobs with attempts left go back to `pending`; the rest fail.
    /// Returns `(requeued, failed)`.
    pub async fn recover_interrupted_jobs(&self) -> Result<(u64, u64), DatabaseError> {
        let now = unix_timestamp();

        let requeued = sqlx::query(
            "UPDATE jobs SET status = 'pending', started_at = NULL WHERE status = 'running' AND attempts < max_attempts",
        )
        .execute(self.pool())
        .await?
        .rows_affected();

        let failed = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = 'interrupted by daemon restart', completed_at = ? WHERE status = 'running'",
        )
        .bind(now)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok((requeued, failed))
    }
}
