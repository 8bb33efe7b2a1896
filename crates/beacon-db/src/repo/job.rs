//! Job store.
//!
//! Preemption is optimistic: a candidate row is read, then claimed with an
//! update guarded by the version that was read. A claim that affects no rows
//! lost the race to another scheduler and the caller scans again.

use async_trait::async_trait;
use beacon_core::job::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;

use crate::{DbError, DbResult};

/// A job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    pub cron: String,
    pub executor: String,
    pub cfg: String,
    pub status: i16,
    pub version: i64,
    pub next_time: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

/// Fields for creating or updating a job by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub name: String,
    pub cron: String,
    pub executor: String,
    pub cfg: String,
    pub next_time: DateTime<Utc>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// One preemptable row: waiting and due at `now`, or running with a
    /// heartbeat at or before `stale_before`.
    async fn find_candidate(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> DbResult<Option<JobRecord>>;

    /// Conditionally move a row to running. True iff exactly this
    /// `(id, version)` pair was claimed.
    async fn try_claim(&self, id: i64, version: i64, now: DateTime<Utc>) -> DbResult<bool>;

    /// Heartbeat for a claimed job. False once the claim has been superseded.
    async fn update_utime(&self, id: i64, version: i64) -> DbResult<bool>;

    /// Return a claimed job to waiting.
    async fn release(&self, id: i64, version: i64) -> DbResult<bool>;

    /// Pause a claimed job whose schedule has ended.
    async fn stop(&self, id: i64, version: i64) -> DbResult<bool>;

    /// Set the next run of a claimed job. False once the claim has been
    /// superseded.
    async fn update_next_time(&self, id: i64, version: i64, next: DateTime<Utc>)
    -> DbResult<bool>;

    /// Insert a waiting job, or update the definition of an existing one
    /// with the same name. Status, version and next time of an existing row
    /// are kept.
    async fn upsert(&self, job: &NewJob) -> DbResult<JobRecord>;

    async fn get_by_name(&self, name: &str) -> DbResult<JobRecord>;

    async fn list(&self) -> DbResult<Vec<JobRecord>>;

    /// Claim one due job, scanning again whenever a claim loses the race.
    ///
    /// Returns `None` when nothing is due. Runs until a claim succeeds, no
    /// candidate remains, or the caller drops the future.
    async fn preempt(&self, lease_expiry: Duration) -> DbResult<Option<JobRecord>> {
        let expiry = chrono::Duration::from_std(lease_expiry)
            .map_err(|e| DbError::InvalidRecord(format!("lease expiry out of range: {}", e)))?;

        loop {
            let now = Utc::now();
            let Some(candidate) = self.find_candidate(now, now - expiry).await? else {
                return Ok(None);
            };

            if self.try_claim(candidate.id, candidate.version, now).await? {
                return Ok(Some(JobRecord {
                    status: JobStatus::Running.as_i16(),
                    version: candidate.version + 1,
                    utime: now,
                    ..candidate
                }));
            }

            debug!(job_id = candidate.id, version = candidate.version, "Lost preemption race, rescanning");
        }
    }
}

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_candidate(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> DbResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE (status = $1 AND next_time <= $2)
               OR (status = $3 AND utime <= $4)
            ORDER BY next_time ASC
            LIMIT 1
            "#,
        )
        .bind(JobStatus::Waiting.as_i16())
        .bind(now)
        .bind(JobStatus::Running.as_i16())
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn try_claim(&self, id: i64, version: i64, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = $1, utime = $2, version = version + 1
            WHERE id = $3 AND version = $4
            "#,
        )
        .bind(JobStatus::Running.as_i16())
        .bind(now)
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_utime(&self, id: i64, version: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET utime = $1 WHERE id = $2 AND version = $3 AND status = $4",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(version)
        .bind(JobStatus::Running.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, id: i64, version: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = $1, utime = $2, version = version + 1
            WHERE id = $3 AND version = $4 AND status = $5
            "#,
        )
        .bind(JobStatus::Waiting.as_i16())
        .bind(Utc::now())
        .bind(id)
        .bind(version)
        .bind(JobStatus::Running.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn stop(&self, id: i64, version: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = $1, utime = $2, version = version + 1
            WHERE id = $3 AND version = $4
            "#,
        )
        .bind(JobStatus::Paused.as_i16())
        .bind(Utc::now())
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_next_time(
        &self,
        id: i64,
        version: i64,
        next: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query("UPDATE jobs SET next_time = $1 WHERE id = $2 AND version = $3")
            .bind(next)
            .bind(id)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert(&self, job: &NewJob) -> DbResult<JobRecord> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO jobs (name, cron, executor, cfg, status, version, next_time, ctime, utime)
            VALUES ($1, $2, $3, $4, $5, 0, $6, NOW(), NOW())
            ON CONFLICT (name) DO UPDATE
            SET cron = EXCLUDED.cron, executor = EXCLUDED.executor, cfg = EXCLUDED.cfg
            RETURNING *
            "#,
        )
        .bind(&job.name)
        .bind(&job.cron)
        .bind(&job.executor)
        .bind(&job.cfg)
        .bind(JobStatus::Waiting.as_i16())
        .bind(job.next_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_name(&self, name: &str) -> DbResult<JobRecord> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", name)))?;
        Ok(record)
    }

    async fn list(&self) -> DbResult<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}
