//! Preemptive scheduling loop.

use beacon_config::SchedulerSettings;
use beacon_core::executor::Executor;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::handle::JobHandle;
use crate::registry::ExecutorRegistry;
use crate::service::JobService;

/// Claims due jobs and runs them on registered executors, at most
/// `capacity` at a time.
pub struct Scheduler {
    registry: ExecutorRegistry,
    service: Arc<JobService>,
    limiter: Arc<Semaphore>,
    settings: SchedulerSettings,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(registry: ExecutorRegistry, service: Arc<JobService>) -> Self {
        let settings = service.settings().clone();
        Self {
            registry,
            limiter: Arc::new(Semaphore::new(settings.capacity)),
            service,
            settings,
            tracker: TaskTracker::new(),
        }
    }

    /// Slots not taken by a running job.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Run until `shutdown` fires. Jobs already started keep running; use
    /// [`Scheduler::wait_idle`] to wait for them.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            capacity = self.settings.capacity,
            executors = ?self.registry.names(),
            "Starting scheduler"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let preempted =
                tokio::time::timeout(self.settings.preempt_timeout, self.service.preempt()).await;

            let handle = match preempted {
                Ok(Ok(Some(handle))) => handle,
                Ok(Ok(None)) => {
                    drop(permit);
                    if !self.pause(self.idle_delay(), &shutdown).await {
                        break;
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    drop(permit);
                    warn!(error = %e, "Failed to preempt job");
                    if !self.pause(self.settings.error_backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    drop(permit);
                    warn!(timeout_ms = self.settings.preempt_timeout.as_millis() as u64, "Preempt timed out");
                    if !self.pause(self.settings.error_backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            handle.attach_permit(permit);

            let job = handle.job();
            let Some(executor) = self.registry.get(&job.executor) else {
                error!(job_id = job.id, name = %job.name, executor = %job.executor, "No executor registered for job");
                handle.abandon();
                continue;
            };

            self.tracker.spawn(run_job(
                handle,
                executor,
                self.service.clone(),
                shutdown.child_token(),
            ));
        }

        info!("Scheduler stopped");
    }

    /// Wait for every spawned job to finish. No new jobs are accepted once
    /// this is called.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn idle_delay(&self) -> Duration {
        let jitter_ms = self.settings.idle_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.settings.idle_backoff + Duration::from_millis(jitter)
    }

    /// Sleep for `delay`. Returns false when shutdown interrupted the sleep.
    async fn pause(&self, delay: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

async fn run_job(
    handle: JobHandle,
    executor: Arc<dyn Executor>,
    service: Arc<JobService>,
    cancel: CancellationToken,
) {
    let job = handle.job().clone();

    // Outcome is logged by the instrumented executor.
    let _ = executor.exec(&job, &cancel).await;

    if !handle.is_lease_healthy() {
        debug!(job_id = job.id, "Lease was unhealthy during execution");
    }

    if let Err(e) = service.reset_next_time(&job).await {
        warn!(job_id = job.id, error = %e, "Failed to reschedule job");
    }
    if let Err(e) = handle.release().await {
        warn!(job_id = job.id, error = %e, "Failed to release job");
    }
}
