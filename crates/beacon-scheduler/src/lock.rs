//! Distributed locks on top of a [`LeaseStore`].
//!
//! A [`Lock`] is owned by exactly one process at a time. Holders keep it
//! alive with [`Lock::auto_refresh`] and give it up with [`Lock::unlock`].

use beacon_core::lease::LeaseStore;
use beacon_core::HolderId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consecutive refresh timeouts tolerated before the lock is given up.
const MAX_REFRESH_TIMEOUTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock '{0}' is held by another process")]
    Contended(String),

    #[error("timed out on lock '{0}'")]
    Timeout(String),

    #[error("lock '{0}' is not held")]
    NotHeld(String),

    #[error("lock '{0}' was lost")]
    Lost(String),

    #[error(transparent)]
    Store(#[from] beacon_core::Error),
}

pub type LockResult<T> = std::result::Result<T, LockError>;

/// How [`LockClient::acquire`] retries a contended key.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Wait `interval` between attempts. `max` bounds the number of retries
    /// after the first attempt; `None` retries until the deadline.
    FixedInterval {
        interval: Duration,
        max: Option<u32>,
    },
}

impl RetryPolicy {
    fn next_delay(&self, retries: u32) -> Option<Duration> {
        match self {
            RetryPolicy::FixedInterval { interval, max } => match max {
                Some(max) if retries >= *max => None,
                _ => Some(*interval),
            },
        }
    }
}

#[derive(Clone)]
pub struct LockClient {
    store: Arc<dyn LeaseStore>,
}

impl LockClient {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Take `key` for `ttl`, retrying per `retry` until `timeout` has
    /// elapsed in total.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        retry: &RetryPolicy,
        timeout: Duration,
    ) -> LockResult<Lock> {
        let holder = HolderId::new();
        let deadline = Instant::now() + timeout;
        let mut retries = 0;

        loop {
            let attempt =
                tokio::time::timeout_at(deadline, self.store.try_acquire(key, holder, ttl)).await;

            match attempt {
                Ok(Ok(true)) => {
                    debug!(key, %holder, "Acquired lock");
                    return Ok(Lock::new(self.store.clone(), key, holder, ttl));
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(LockError::Timeout(key.to_string())),
            }

            let Some(delay) = retry.next_delay(retries) else {
                return Err(LockError::Contended(key.to_string()));
            };
            retries += 1;

            if Instant::now() + delay >= deadline {
                return Err(LockError::Timeout(key.to_string()));
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// A held distributed lock. Clones share ownership state.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

struct LockInner {
    store: Arc<dyn LeaseStore>,
    key: String,
    holder: HolderId,
    ttl: Duration,
    released: AtomicBool,
    unlocked: CancellationToken,
}

impl Lock {
    fn new(store: Arc<dyn LeaseStore>, key: &str, holder: HolderId, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(LockInner {
                store,
                key: key.to_string(),
                holder,
                ttl,
                released: AtomicBool::new(false),
                unlocked: CancellationToken::new(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn holder(&self) -> HolderId {
        self.inner.holder
    }

    /// Extend the lease by its ttl.
    pub async fn refresh(&self, timeout: Duration) -> LockResult<()> {
        let inner = &self.inner;
        if inner.released.load(Ordering::Acquire) {
            return Err(LockError::NotHeld(inner.key.clone()));
        }

        let refreshed = tokio::time::timeout(
            timeout,
            inner.store.refresh(&inner.key, inner.holder, inner.ttl),
        )
        .await
        .map_err(|_| LockError::Timeout(inner.key.clone()))??;

        if refreshed {
            Ok(())
        } else {
            Err(LockError::Lost(inner.key.clone()))
        }
    }

    /// Refresh every `interval` until [`Lock::unlock`] is called or the
    /// lease is lost.
    ///
    /// Timeouts are retried straight away, up to three in a row. Returns
    /// `Ok` once unlocked.
    pub async fn auto_refresh(&self, interval: Duration, timeout: Duration) -> LockResult<()> {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut timeouts = 0;

        loop {
            tokio::select! {
                _ = self.inner.unlocked.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            loop {
                match self.refresh(timeout).await {
                    Ok(()) => {
                        timeouts = 0;
                        break;
                    }
                    Err(LockError::Timeout(key)) => {
                        timeouts += 1;
                        if timeouts >= MAX_REFRESH_TIMEOUTS {
                            warn!(key = %key, timeouts, "Giving up lock after repeated refresh timeouts");
                            return Err(LockError::Timeout(key));
                        }
                        debug!(key = %key, timeouts, "Lock refresh timed out, retrying");
                    }
                    // Unlocked while the refresh was in flight
                    Err(LockError::NotHeld(_)) => return Ok(()),
                    Err(e) => {
                        warn!(key = %self.inner.key, error = %e, "Lock refresh failed");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Give the lock up. Only the first call releases the lease; later calls
    /// return [`LockError::NotHeld`].
    ///
    /// A release that outlives `timeout` is abandoned and the lease is left
    /// to expire.
    pub async fn unlock(&self, timeout: Duration) -> LockResult<()> {
        let inner = &self.inner;
        if inner.released.swap(true, Ordering::AcqRel) {
            return Err(LockError::NotHeld(inner.key.clone()));
        }
        inner.unlocked.cancel();

        let released = tokio::time::timeout(timeout, inner.store.release(&inner.key, inner.holder))
            .await
            .map_err(|_| LockError::Timeout(inner.key.clone()))??;

        if released {
            info!(key = %inner.key, holder = %inner.holder, "Released lock");
            Ok(())
        } else {
            Err(LockError::NotHeld(inner.key.clone()))
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.inner.key)
            .field("holder", &self.inner.holder)
            .field("released", &self.inner.released.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_db::memory::MemoryLeaseStore;

    fn retry() -> RetryPolicy {
        RetryPolicy::FixedInterval {
            interval: Duration::from_millis(10),
            max: None,
        }
    }

    #[tokio::test]
    async fn test_single_holder_wins_race() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::new(store.clone());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                client
                    .acquire(
                        "ranking_job",
                        Duration::from_secs(60),
                        &RetryPolicy::FixedInterval {
                            interval: Duration::from_millis(5),
                            max: Some(0),
                        },
                        Duration::from_secs(1),
                    )
                    .await
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            if let Ok(lock) = task.await.unwrap() {
                winners.push(lock);
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(store.holder("ranking_job"), Some(winners[0].holder()));
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_contended() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::new(store);

        let _held = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_acquire_after_expiry() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::new(store);

        let first = client
            .acquire("key", Duration::from_millis(30), &retry(), Duration::from_secs(1))
            .await
            .unwrap();
        let second = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_ne!(first.holder(), second.holder());
        assert!(matches!(
            first.refresh(Duration::from_secs(1)).await,
            Err(LockError::Lost(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::new(store.clone());
        let lock = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();

        lock.unlock(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            lock.unlock(Duration::from_secs(1)).await,
            Err(LockError::NotHeld(_))
        ));
        assert!(store.holder("key").is_none());
    }

    #[tokio::test]
    async fn test_auto_refresh_keeps_lease_until_unlock() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::new(store.clone());
        let lock = client
            .acquire("key", Duration::from_millis(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();

        let refresher = tokio::spawn({
            let lock = lock.clone();
            async move {
                lock.auto_refresh(Duration::from_millis(20), Duration::from_secs(1))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.holder("key"), Some(lock.holder()));

        lock.unlock(Duration::from_secs(1)).await.unwrap();
        refresher.await.unwrap().unwrap();
        assert!(store.holder("key").is_none());
    }

    #[tokio::test]
    async fn test_auto_refresh_reports_lost_lease() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::new(store.clone());
        let lock = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();

        // Someone else releases our lease from under us
        assert!(store.release("key", lock.holder()).await.unwrap());
        let result = lock
            .auto_refresh(Duration::from_millis(10), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(LockError::Lost(_))));
    }

    struct HangingStore;

    #[async_trait]
    impl LeaseStore for HangingStore {
        async fn try_acquire(&self, _: &str, _: HolderId, _: Duration) -> beacon_core::Result<bool> {
            Ok(true)
        }

        async fn refresh(&self, _: &str, _: HolderId, _: Duration) -> beacon_core::Result<bool> {
            std::future::pending().await
        }

        async fn release(&self, _: &str, _: HolderId) -> beacon_core::Result<bool> {
            Ok(true)
        }
    }

    struct StuckReleaseStore;

    #[async_trait]
    impl LeaseStore for StuckReleaseStore {
        async fn try_acquire(&self, _: &str, _: HolderId, _: Duration) -> beacon_core::Result<bool> {
            Ok(true)
        }

        async fn refresh(&self, _: &str, _: HolderId, _: Duration) -> beacon_core::Result<bool> {
            Ok(true)
        }

        async fn release(&self, _: &str, _: HolderId) -> beacon_core::Result<bool> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_unlock_gives_up_on_hung_release() {
        let client = LockClient::new(Arc::new(StuckReleaseStore));
        let lock = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            lock.unlock(Duration::from_millis(20)),
        )
        .await
        .expect("unlock must not hang");
        assert!(matches!(result, Err(LockError::Timeout(_))));

        // Still counts as released locally
        assert!(matches!(
            lock.unlock(Duration::from_millis(20)).await,
            Err(LockError::NotHeld(_))
        ));
        assert!(matches!(
            lock.refresh(Duration::from_millis(20)).await,
            Err(LockError::NotHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_refresh_gives_up_after_repeated_timeouts() {
        let client = LockClient::new(Arc::new(HangingStore));
        let lock = client
            .acquire("key", Duration::from_secs(60), &retry(), Duration::from_secs(1))
            .await
            .unwrap();

        let result = lock
            .auto_refresh(Duration::from_millis(10), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(LockError::Timeout(_))));
    }
}
