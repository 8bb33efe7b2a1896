//! Translation between job rows and domain jobs.

use beacon_core::Result;
use beacon_core::job::{Job, JobStatus};
use beacon_db::{JobRecord, JobStore, NewJob};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Stateless view over a [`JobStore`] speaking domain types.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn JobStore>,
}

impl JobRepository {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Claim one due job. `None` means nothing is due.
    pub async fn preempt(&self, lease_expiry: Duration) -> Result<Option<Job>> {
        self.store
            .preempt(lease_expiry)
            .await?
            .map(to_domain)
            .transpose()
    }

    pub async fn update_utime(&self, id: i64, version: i64) -> Result<bool> {
        Ok(self.store.update_utime(id, version).await?)
    }

    pub async fn release(&self, id: i64, version: i64) -> Result<bool> {
        Ok(self.store.release(id, version).await?)
    }

    pub async fn stop(&self, id: i64, version: i64) -> Result<bool> {
        Ok(self.store.stop(id, version).await?)
    }

    pub async fn update_next_time(
        &self,
        id: i64,
        version: i64,
        next: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.store.update_next_time(id, version, next).await?)
    }

    /// Create or update a job definition by name.
    pub async fn upsert(&self, job: &NewJob) -> Result<Job> {
        to_domain(self.store.upsert(job).await?)
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        self.store.list().await?.into_iter().map(to_domain).collect()
    }
}

fn to_domain(record: JobRecord) -> Result<Job> {
    Ok(Job {
        id: record.id,
        status: JobStatus::try_from(record.status)?,
        name: record.name,
        cron: record.cron,
        executor: record.executor,
        cfg: record.cfg,
        version: record.version,
        next_time: record.next_time,
        ctime: record.ctime,
        utime: record.utime,
    })
}
