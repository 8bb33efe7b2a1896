//! Job lifecycle operations used by the scheduler loop.

use beacon_config::SchedulerSettings;
use beacon_core::job::{CronParser, Job};
use beacon_core::{Error, Result};
use beacon_db::{JobStore, NewJob};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::handle::JobHandle;
use crate::repository::JobRepository;

pub struct JobService {
    repo: JobRepository,
    parser: CronParser,
    settings: SchedulerSettings,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, settings: SchedulerSettings) -> Self {
        Self {
            repo: JobRepository::new(store),
            parser: CronParser::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Claim a due job and start renewing its lease.
    pub async fn preempt(&self) -> Result<Option<JobHandle>> {
        let Some(job) = self.repo.preempt(self.settings.lease_expiry).await? else {
            return Ok(None);
        };

        debug!(job_id = job.id, name = %job.name, version = job.version, "Preempted job");
        Ok(Some(JobHandle::start(
            job,
            self.repo.clone(),
            self.settings.refresh_interval,
            self.settings.store_timeout,
        )))
    }

    /// Schedule the next run of `job`, or pause it when its cron has no
    /// future time or no longer parses.
    pub async fn reset_next_time(&self, job: &Job) -> Result<()> {
        let next = match job.next_time(&self.parser, Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                warn!(job_id = job.id, cron = %job.cron, error = %e, "Invalid cron, pausing job");
                None
            }
        };

        match next {
            Some(next) => {
                let updated = with_timeout(
                    self.settings.store_timeout,
                    format!("update next time of job {}", job.id),
                    self.repo.update_next_time(job.id, job.version, next),
                )
                .await?;
                if !updated {
                    warn!(job_id = job.id, version = job.version, "Claim superseded, next time not updated");
                }
                Ok(())
            }
            None => {
                let stopped = with_timeout(
                    self.settings.store_timeout,
                    format!("stop job {}", job.id),
                    self.repo.stop(job.id, job.version),
                )
                .await?;
                if stopped {
                    info!(job_id = job.id, name = %job.name, "Job has no future run, paused");
                }
                Ok(())
            }
        }
    }

    /// Register `job` from configuration. A new definition is due at its
    /// next cron time; existing rows keep their status and version.
    pub async fn upsert(&self, name: &str, cron: &str, executor: &str, cfg: &str) -> Result<Job> {
        let next_time = self
            .parser
            .next_after(cron, Utc::now())?
            .ok_or_else(|| Error::InvalidInput(format!("cron '{}' has no future run", cron)))?;

        self.repo
            .upsert(&NewJob {
                name: name.to_string(),
                cron: cron.to_string(),
                executor: executor.to_string(),
                cfg: cfg.to_string(),
                next_time,
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        self.repo.list().await
    }
}

/// Bound a store call. An elapsed deadline becomes [`Error::Timeout`]
/// naming the operation.
pub(crate) async fn with_timeout<T, F>(limit: Duration, what: String, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(what)),
    }
}
