//! Two-tier storage for the latest ranking snapshot.
//!
//! The local tier is an in-process copy with its own expiry. The shared tier
//! is visible to every process and carries articles without their bodies.

use beacon_core::article::Article;
use beacon_core::cache::SharedCache;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{RankingError, RankingResult};

struct Snapshot {
    articles: Vec<Article>,
    expires_at: Instant,
}

/// In-process snapshot. Expired snapshots stay readable through
/// [`RankingLocalCache::force_get`].
pub struct RankingLocalCache {
    snapshot: RwLock<Option<Snapshot>>,
    ttl: Duration,
}

impl RankingLocalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshot: RwLock::new(None),
            ttl,
        }
    }

    pub fn set(&self, articles: Vec<Article>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Snapshot {
            articles,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// The snapshot, if set, non-empty and unexpired.
    pub fn get(&self) -> Option<Vec<Article>> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot
            .as_ref()
            .filter(|s| !s.articles.is_empty() && s.expires_at > Instant::now())
            .map(|s| s.articles.clone())
    }

    /// The snapshot regardless of expiry.
    pub fn force_get(&self) -> Option<Vec<Article>> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot
            .as_ref()
            .filter(|s| !s.articles.is_empty())
            .map(|s| s.articles.clone())
    }
}

/// Snapshot stored as JSON in a [`SharedCache`].
pub struct RankingSharedCache {
    cache: Arc<dyn SharedCache>,
    key: String,
    ttl: Duration,
}

impl RankingSharedCache {
    pub fn new(cache: Arc<dyn SharedCache>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache,
            key: key.into(),
            ttl,
        }
    }

    pub async fn set(&self, articles: &[Article]) -> RankingResult<()> {
        let stripped: Vec<Article> = articles.iter().map(Article::without_content).collect();
        let payload = serde_json::to_vec(&stripped)?;
        self.cache.set(&self.key, payload, self.ttl).await?;
        Ok(())
    }

    pub async fn get(&self) -> RankingResult<Option<Vec<Article>>> {
        match self.cache.get(&self.key).await? {
            Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
            None => Ok(None),
        }
    }
}

pub struct RankingCache {
    local: RankingLocalCache,
    shared: RankingSharedCache,
}

impl RankingCache {
    pub fn new(local: RankingLocalCache, shared: RankingSharedCache) -> Self {
        Self { local, shared }
    }

    /// Store a fresh snapshot in both tiers. The local tier is always
    /// updated; the error reports a failed shared write.
    pub async fn replace(&self, articles: &[Article]) -> RankingResult<()> {
        self.local.set(articles.to_vec());
        self.shared.set(articles).await
    }

    /// Read the snapshot: unexpired local copy first, then the shared tier
    /// (refilling the local copy), then any stale local copy.
    pub async fn get(&self) -> RankingResult<Vec<Article>> {
        if let Some(articles) = self.local.get() {
            return Ok(articles);
        }

        let shared_err = match self.shared.get().await {
            Ok(Some(articles)) if !articles.is_empty() => {
                self.local.set(articles.clone());
                return Ok(articles);
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read shared ranking cache");
                Some(e)
            }
        };

        if let Some(articles) = self.local.force_get() {
            debug!("Serving stale local ranking snapshot");
            return Ok(articles);
        }

        Err(shared_err.unwrap_or(RankingError::CacheMiss))
    }

    /// The local snapshot even if expired.
    pub fn force_get(&self) -> RankingResult<Vec<Article>> {
        self.local.force_get().ok_or(RankingError::CacheMiss)
    }
}
