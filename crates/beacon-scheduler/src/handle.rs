//! Runtime handle for a preempted job.

use beacon_core::job::Job;
use beacon_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::repository::JobRepository;
use crate::service::with_timeout;

/// A job claimed by this process.
///
/// While the handle is live a background task keeps the claim fresh. The
/// claim ends through exactly one of [`JobHandle::release`] or
/// [`JobHandle::abandon`]; later calls to either are no-ops.
#[derive(Clone)]
pub struct JobHandle {
    job: Job,
    inner: Arc<HandleInner>,
}

struct HandleInner {
    repo: JobRepository,
    store_timeout: Duration,
    renewal: CancellationToken,
    lease_healthy: Arc<AtomicBool>,
    finished: AtomicBool,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.renewal.cancel();
    }
}

impl JobHandle {
    /// Wrap a freshly claimed job and start heartbeating it every
    /// `refresh_interval`.
    pub(crate) fn start(
        job: Job,
        repo: JobRepository,
        refresh_interval: Duration,
        store_timeout: Duration,
    ) -> Self {
        let renewal = CancellationToken::new();
        let lease_healthy = Arc::new(AtomicBool::new(true));

        tokio::spawn(renew(
            repo.clone(),
            job.id,
            job.version,
            refresh_interval,
            store_timeout,
            renewal.clone(),
            lease_healthy.clone(),
        ));

        Self {
            job,
            inner: Arc::new(HandleInner {
                repo,
                store_timeout,
                renewal,
                lease_healthy,
                finished: AtomicBool::new(false),
                permit: Mutex::new(None),
            }),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// False after the most recent heartbeat failed or the claim was
    /// superseded by another scheduler.
    pub fn is_lease_healthy(&self) -> bool {
        self.inner.lease_healthy.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Tie a concurrency slot to this handle. The slot is returned when the
    /// claim ends.
    pub fn attach_permit(&self, permit: OwnedSemaphorePermit) {
        *self
            .inner
            .permit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(permit);
    }

    /// Stop heartbeating, return the concurrency slot and put the job back
    /// to waiting.
    pub async fn release(&self) -> Result<()> {
        if !self.finish() {
            return Ok(());
        }

        let released = with_timeout(
            self.inner.store_timeout,
            format!("release job {}", self.job.id),
            self.inner.repo.release(self.job.id, self.job.version),
        )
        .await?;

        if !released {
            // Paused by the reschedule step, or reclaimed after our lease expired.
            debug!(job_id = self.job.id, version = self.job.version, "Job no longer held at release");
        }
        Ok(())
    }

    /// Stop heartbeating and return the concurrency slot without touching
    /// the row. The job stays running in storage until its lease expires.
    pub fn abandon(&self) {
        if self.finish() {
            info!(job_id = self.job.id, "Abandoned job, it will be reclaimed after its lease expires");
        }
    }

    /// Runs once per handle. Returns false if the claim had already ended.
    fn finish(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.renewal.cancel();
        self.inner
            .permit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }
}

async fn renew(
    repo: JobRepository,
    id: i64,
    version: i64,
    interval: Duration,
    store_timeout: Duration,
    cancel: CancellationToken,
    healthy: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = with_timeout(
            store_timeout,
            format!("renew job {}", id),
            repo.update_utime(id, version),
        )
        .await;

        match result {
            Ok(true) => healthy.store(true, Ordering::Release),
            Ok(false) => {
                warn!(job_id = id, version, "Job claim superseded, stopping renewal");
                healthy.store(false, Ordering::Release);
                return;
            }
            Err(e) => {
                warn!(job_id = id, error = %e, "Failed to renew job lease");
                healthy.store(false, Ordering::Release);
            }
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job.id)
            .field("version", &self.job.version)
            .field("finished", &self.is_finished())
            .finish()
    }
}
