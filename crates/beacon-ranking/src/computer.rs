//! Top-N hot article computation.

use beacon_config::RankingSettings;
use beacon_core::Result;
use beacon_core::article::{ARTICLE_BIZ, Article, ArticleService, InteractiveService};
use chrono::{DateTime, TimeDelta, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::topn::TopN;

/// Scores an article from its like count, publish time and the current time.
pub type ScoreFn = Arc<dyn Fn(i64, DateTime<Utc>, DateTime<Utc>) -> f64 + Send + Sync>;

/// Default hotness score: likes decayed by age.
///
/// `(likes - 1) / (seconds_since_publish + 2) ^ 1.5`
pub fn hot_score(likes: i64, published: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = (now - published).num_milliseconds().max(0) as f64 / 1000.0;
    (likes - 1) as f64 / (age + 2.0).powf(1.5)
}

pub struct RankingComputer {
    articles: Arc<dyn ArticleService>,
    interactives: Arc<dyn InteractiveService>,
    n: usize,
    batch_size: usize,
    horizon: TimeDelta,
    score: ScoreFn,
}

impl RankingComputer {
    pub fn new(
        articles: Arc<dyn ArticleService>,
        interactives: Arc<dyn InteractiveService>,
        settings: &RankingSettings,
    ) -> Self {
        Self {
            articles,
            interactives,
            n: settings.n,
            batch_size: settings.batch_size.max(1),
            horizon: TimeDelta::from_std(settings.horizon).unwrap_or(TimeDelta::MAX),
            score: Arc::new(hot_score),
        }
    }

    pub fn with_score_fn(mut self, score: ScoreFn) -> Self {
        self.score = score;
        self
    }

    /// The `n` hottest published articles as of `now`, hottest first.
    pub async fn compute(&self, now: DateTime<Utc>) -> Result<Vec<Article>> {
        let oldest_allowed = now.checked_sub_signed(self.horizon).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut top = TopN::new(self.n);
        let mut seq = 0u64;
        let mut offset = 0;

        loop {
            let batch = self.articles.list_pub(now, offset, self.batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            let oldest_in_batch = last.utime;
            let fetched = batch.len();

            let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
            let counters = self.interactives.get_by_ids(ARTICLE_BIZ, &ids).await?;

            for article in batch {
                let Some(counter) = counters.get(&article.id) else {
                    continue;
                };
                let score = (self.score)(counter.like_cnt, article.utime, now);
                top.push(Scored { score, seq, article });
                seq += 1;
            }

            if fetched < self.batch_size || oldest_in_batch < oldest_allowed {
                break;
            }
            offset += fetched;
        }

        debug!(scanned = seq, kept = top.len(), "Computed ranking");
        Ok(top.into_sorted_desc().into_iter().map(|s| s.article).collect())
    }
}

/// An article with its score. Greater means hotter; on equal scores the
/// earlier scanned article is greater.
struct Scored {
    score: f64,
    seq: u64,
    article: Article,
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeArticles, FakeInteractives, article};
    use chrono::Duration;

    fn settings(n: usize, batch_size: usize) -> RankingSettings {
        RankingSettings {
            n,
            batch_size,
            ..RankingSettings::default()
        }
    }

    fn ids(articles: &[Article]) -> Vec<i64> {
        articles.iter().map(|a| a.id).collect()
    }

    #[tokio::test]
    async fn test_orders_by_likes_at_equal_age() {
        let now = Utc::now();
        let published = now - Duration::minutes(1);
        let articles = Arc::new(FakeArticles::new(vec![
            article(1, published),
            article(2, published),
            article(3, published),
        ]));
        let interactives = Arc::new(FakeInteractives::new([(1, 1), (2, 2), (3, 3)]));

        let computer = RankingComputer::new(articles.clone(), interactives, &settings(3, 3));
        let top = computer.compute(now).await.unwrap();
        assert_eq!(ids(&top), vec![3, 2, 1]);
        // A full batch asks for more; the empty one ends the scan
        assert_eq!(articles.calls(), 2);
    }

    #[tokio::test]
    async fn test_keeps_n_across_batches() {
        let now = Utc::now();
        let articles: Vec<Article> = (1..=10)
            .map(|id| article(id, now - Duration::minutes(id)))
            .collect();
        let likes: Vec<(i64, i64)> = (1..=10).map(|id| (id, 100)).collect();
        let articles = Arc::new(FakeArticles::new(articles));
        let interactives = Arc::new(FakeInteractives::new(likes));

        let computer = RankingComputer::new(articles.clone(), interactives.clone(), &settings(3, 4));
        let top = computer.compute(now).await.unwrap();

        // Same likes, so the newest win
        assert_eq!(ids(&top), vec![1, 2, 3]);
        assert_eq!(articles.calls(), 3);
        assert_eq!(
            interactives.requests(),
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10]]
        );
    }

    #[tokio::test]
    async fn test_stops_past_horizon() {
        let now = Utc::now();
        let articles = Arc::new(FakeArticles::new(vec![
            article(1, now - Duration::days(1)),
            article(2, now - Duration::days(8)),
            article(3, now - Duration::days(9)),
            article(4, now - Duration::days(10)),
        ]));
        let interactives = Arc::new(FakeInteractives::new([(1, 5), (2, 5), (3, 5), (4, 500)]));

        let computer = RankingComputer::new(articles.clone(), interactives, &settings(10, 2));
        let top = computer.compute(now).await.unwrap();

        // The first batch already reaches past seven days
        assert_eq!(articles.calls(), 1);
        assert_eq!(ids(&top), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_skips_articles_without_counters() {
        let now = Utc::now();
        let articles = Arc::new(FakeArticles::new(vec![
            article(1, now - Duration::minutes(1)),
            article(2, now - Duration::minutes(2)),
        ]));
        let interactives = Arc::new(FakeInteractives::new([(2, 10)]));

        let computer = RankingComputer::new(articles, interactives, &settings(10, 10));
        assert_eq!(ids(&computer.compute(now).await.unwrap()), vec![2]);
    }

    #[tokio::test]
    async fn test_empty_source_yields_empty_ranking() {
        let articles = Arc::new(FakeArticles::new(Vec::new()));
        let interactives = Arc::new(FakeInteractives::default());

        let computer = RankingComputer::new(articles, interactives.clone(), &settings(10, 10));
        assert!(computer.compute(Utc::now()).await.unwrap().is_empty());
        assert!(interactives.requests().is_empty());
    }

    #[tokio::test]
    async fn test_equal_scores_keep_first_scanned() {
        let now = Utc::now();
        let articles = Arc::new(FakeArticles::new(
            (1..=5).map(|id| article(id, now - Duration::minutes(id))).collect(),
        ));
        let interactives = Arc::new(FakeInteractives::new((1..=5).map(|id| (id, 1))));

        let computer = RankingComputer::new(articles, interactives, &settings(2, 10))
            .with_score_fn(Arc::new(|_, _, _| 1.0));
        assert_eq!(ids(&computer.compute(now).await.unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_source_error_is_returned() {
        let computer = RankingComputer::new(
            Arc::new(FakeArticles::failing()),
            Arc::new(FakeInteractives::default()),
            &settings(10, 10),
        );
        assert!(computer.compute(Utc::now()).await.is_err());
    }

    #[test]
    fn test_hot_score_decays_with_age() {
        let now = Utc::now();
        let fresh = hot_score(10, now - Duration::minutes(1), now);
        let stale = hot_score(10, now - Duration::hours(5), now);
        assert!(fresh > stale);
        assert_eq!(hot_score(1, now, now), 0.0);
        // Future publish times count as zero age
        assert_eq!(hot_score(3, now + Duration::hours(1), now), 2.0 / 2f64.powf(1.5));
    }
}
