//! Ranking computation wired to the snapshot cache.

use beacon_core::article::Article;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::RankingCache;
use crate::computer::RankingComputer;
use crate::error::RankingResult;

pub struct RankingService {
    computer: RankingComputer,
    cache: Arc<RankingCache>,
}

impl RankingService {
    pub fn new(computer: RankingComputer, cache: Arc<RankingCache>) -> Self {
        Self { computer, cache }
    }

    /// Recompute the ranking and publish it. A failed cache write is logged
    /// and does not fail the run.
    pub async fn top_n(&self) -> RankingResult<Vec<Article>> {
        let articles = self.computer.compute(Utc::now()).await?;
        info!(count = articles.len(), "Ranking computed");

        if let Err(e) = self.cache.replace(&articles).await {
            warn!(error = %e, "Failed to publish ranking snapshot");
        }
        Ok(articles)
    }

    /// The most recently published ranking.
    pub async fn cached(&self) -> RankingResult<Vec<Article>> {
        self.cache.get().await
    }
}
