//! Scheduled ranking refresh.
//!
//! Every process registers a [`RankingJob`], but only the holder of the
//! ranking lock computes. The lock is kept across runs and renewed in the
//! background until it is lost or the job is closed.
//!
//! [`register_local`] offers the same refresh as a lock-free function on
//! the local executor.

use async_trait::async_trait;
use beacon_config::RankingSettings;
use beacon_core::executor::Executor;
use beacon_core::job::Job;
use beacon_scheduler::{LocalFuncExecutor, Lock, LockClient, LockError, RetryPolicy};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RankingError;
use crate::service::RankingService;

pub struct RankingJob {
    service: Arc<RankingService>,
    locks: LockClient,
    settings: RankingSettings,
    held: Arc<Mutex<Option<Lock>>>,
}

impl RankingJob {
    pub const NAME: &'static str = "ranking_job";

    pub fn new(service: Arc<RankingService>, locks: LockClient, settings: RankingSettings) -> Self {
        Self {
            service,
            locks,
            settings,
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether this process currently owns the ranking lock.
    pub async fn holds_lock(&self) -> bool {
        self.held.lock().await.is_some()
    }

    /// Give up the ranking lock, if held.
    pub async fn close(&self) -> Result<(), RankingError> {
        let Some(lock) = self.held.lock().await.take() else {
            return Ok(());
        };
        match lock.unlock(self.settings.lock_refresh_timeout).await {
            Ok(()) | Err(LockError::NotHeld(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the ranking lock unless another process has it. Returns false
    /// when this run should be skipped.
    async fn ensure_lock(&self) -> bool {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return true;
        }

        let retry = RetryPolicy::FixedInterval {
            interval: self.settings.lock_retry_interval,
            max: None,
        };
        let lock = match self
            .locks
            .acquire(
                &self.settings.lock_key,
                self.settings.job_timeout,
                &retry,
                self.settings.lock_acquire_timeout,
            )
            .await
        {
            Ok(lock) => lock,
            Err(e) => {
                debug!(key = %self.settings.lock_key, error = %e, "Ranking lock not acquired, skipping run");
                return false;
            }
        };

        info!(key = %lock.key(), holder = %lock.holder(), "Acquired ranking lock");
        *held = Some(lock.clone());
        tokio::spawn(keep_alive(
            lock,
            self.held.clone(),
            self.settings.job_timeout / 2,
            self.settings.lock_refresh_timeout,
        ));
        true
    }
}

/// Renew `lock` until it is unlocked or lost, then clear the slot if it
/// still refers to this lock.
async fn keep_alive(
    lock: Lock,
    slot: Arc<Mutex<Option<Lock>>>,
    interval: Duration,
    timeout: Duration,
) {
    let result = lock.auto_refresh(interval, timeout).await;

    let mut held = slot.lock().await;
    if held.as_ref().map(Lock::holder) == Some(lock.holder()) {
        *held = None;
    }
    drop(held);

    if let Err(e) = result {
        warn!(key = %lock.key(), error = %e, "Lost ranking lock");
        // Best effort, the lease may already belong to someone else
        let _ = lock.unlock(timeout).await;
    }
}

#[async_trait]
impl Executor for RankingJob {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn exec(&self, _job: &Job, cancel: &CancellationToken) -> beacon_core::Result<()> {
        if !self.ensure_lock().await {
            return Ok(());
        }

        refresh(&self.service, self.settings.job_timeout, cancel).await
    }
}

/// Job name of the lock-free ranking function on the local executor.
pub const LOCAL_RANKING: &str = "ranking";

/// Register a ranking refresh on `local` under [`LOCAL_RANKING`]. Runs take
/// no distributed lock and each one is bounded by `timeout`.
pub fn register_local(
    local: &mut LocalFuncExecutor,
    service: Arc<RankingService>,
    timeout: Duration,
) {
    local.register(LOCAL_RANKING, move |_job, cancel| {
        let service = service.clone();
        async move { refresh(&service, timeout, &cancel).await }.boxed()
    });
}

async fn refresh(
    service: &RankingService,
    limit: Duration,
    cancel: &CancellationToken,
) -> beacon_core::Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(beacon_core::Error::Cancelled),
        result = tokio::time::timeout(limit, service.top_n()) => match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RankingError::Timeout(limit).into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{RankingCache, RankingLocalCache, RankingSharedCache};
    use crate::computer::RankingComputer;
    use crate::testing::{FakeArticles, FakeInteractives, HangingArticles, article};
    use beacon_core::article::ArticleService;
    use beacon_core::job::JobStatus;
    use beacon_core::lease::LeaseStore;
    use beacon_db::memory::{MemoryLeaseStore, MemorySharedCache};
    use chrono::Utc;

    fn job_row() -> Job {
        let now = Utc::now();
        Job {
            id: 1,
            name: "ranking".to_string(),
            cron: "0 */3 * * * *".to_string(),
            executor: RankingJob::NAME.to_string(),
            cfg: String::new(),
            status: JobStatus::Running,
            version: 1,
            next_time: now,
            ctime: now,
            utime: now,
        }
    }

    fn settings() -> RankingSettings {
        RankingSettings {
            job_timeout: Duration::from_secs(2),
            lock_acquire_timeout: Duration::from_millis(50),
            lock_retry_interval: Duration::from_millis(10),
            ..RankingSettings::default()
        }
    }

    fn ranking_service(
        articles: Arc<dyn ArticleService>,
        shared: Arc<MemorySharedCache>,
    ) -> Arc<RankingService> {
        let interactives = Arc::new(FakeInteractives::new([(1, 3), (2, 5)]));
        let settings = settings();
        let computer = RankingComputer::new(articles, interactives, &settings);
        let cache = Arc::new(RankingCache::new(
            RankingLocalCache::new(settings.local_ttl),
            RankingSharedCache::new(shared, settings.shared_key.clone(), settings.shared_ttl),
        ));
        Arc::new(RankingService::new(computer, cache))
    }

    fn ranking_job(leases: Arc<MemoryLeaseStore>, shared: Arc<MemorySharedCache>) -> RankingJob {
        let now = Utc::now();
        let articles = Arc::new(FakeArticles::new(vec![article(1, now), article(2, now)]));
        RankingJob::new(
            ranking_service(articles, shared),
            LockClient::new(leases),
            settings(),
        )
    }

    async fn shared_ids(shared: &Arc<MemorySharedCache>) -> Option<Vec<i64>> {
        RankingSharedCache::new(shared.clone(), "ranking", Duration::from_secs(60))
            .get()
            .await
            .unwrap()
            .map(|articles| articles.iter().map(|a| a.id).collect())
    }

    #[tokio::test]
    async fn test_lock_holder_computes_and_keeps_lock() {
        let leases = Arc::new(MemoryLeaseStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let job = ranking_job(leases.clone(), shared.clone());

        job.exec(&job_row(), &CancellationToken::new()).await.unwrap();
        assert!(job.holds_lock().await);
        assert_eq!(shared_ids(&shared).await, Some(vec![2, 1]));

        // Second run reuses the held lock
        job.exec(&job_row(), &CancellationToken::new()).await.unwrap();
        assert!(leases.holder("ranking_job").is_some());

        job.close().await.unwrap();
        assert!(!job.holds_lock().await);
        assert!(leases.holder("ranking_job").is_none());
    }

    #[tokio::test]
    async fn test_contended_run_skips_work() {
        let leases = Arc::new(MemoryLeaseStore::new());
        let first = ranking_job(leases.clone(), Arc::new(MemorySharedCache::new()));
        first.exec(&job_row(), &CancellationToken::new()).await.unwrap();

        let shared = Arc::new(MemorySharedCache::new());
        let second = ranking_job(leases, shared.clone());
        second.exec(&job_row(), &CancellationToken::new()).await.unwrap();

        assert!(!second.holds_lock().await);
        assert_eq!(shared_ids(&shared).await, None);
        first.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_lock_is_cleared() {
        let leases = Arc::new(MemoryLeaseStore::new());
        let job = RankingJob {
            settings: RankingSettings {
                job_timeout: Duration::from_millis(40),
                ..settings()
            },
            ..ranking_job(leases.clone(), Arc::new(MemorySharedCache::new()))
        };
        job.exec(&job_row(), &CancellationToken::new()).await.unwrap();
        let holder = leases.holder("ranking_job").unwrap();

        // The lease is taken away before the next renewal
        leases.release("ranking_job", holder).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!job.holds_lock().await);
        job.close().await.unwrap();
    }

    fn local_row() -> Job {
        Job {
            name: LOCAL_RANKING.to_string(),
            executor: LocalFuncExecutor::NAME.to_string(),
            ..job_row()
        }
    }

    #[tokio::test]
    async fn test_local_function_publishes_ranking() {
        let shared = Arc::new(MemorySharedCache::new());
        let now = Utc::now();
        let articles = Arc::new(FakeArticles::new(vec![article(1, now), article(2, now)]));

        let mut local = LocalFuncExecutor::new();
        register_local(
            &mut local,
            ranking_service(articles, shared.clone()),
            Duration::from_secs(1),
        );

        local.exec(&local_row(), &CancellationToken::new()).await.unwrap();
        assert_eq!(shared_ids(&shared).await, Some(vec![2, 1]));
    }

    #[tokio::test]
    async fn test_local_function_is_bounded_by_its_timeout() {
        let shared = Arc::new(MemorySharedCache::new());
        let mut local = LocalFuncExecutor::new();
        register_local(
            &mut local,
            ranking_service(Arc::new(HangingArticles), shared.clone()),
            Duration::from_millis(30),
        );

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            local.exec(&local_row(), &CancellationToken::new()),
        )
        .await
        .expect("local ranking must stop at its own timeout")
        .unwrap_err();
        assert!(matches!(err, beacon_core::Error::Timeout(_)));
        assert_eq!(shared_ids(&shared).await, None);
    }

    #[tokio::test]
    async fn test_close_without_lock_is_noop() {
        let job = ranking_job(
            Arc::new(MemoryLeaseStore::new()),
            Arc::new(MemorySharedCache::new()),
        );
        job.close().await.unwrap();
        job.close().await.unwrap();
    }
}
