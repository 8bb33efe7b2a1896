//! In-memory collaborators for ranking tests.

use async_trait::async_trait;
use beacon_core::article::{
    ARTICLE_BIZ, Article, ArticleService, ArticleStatus, Interactive, InteractiveService,
};
use beacon_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn article(id: i64, utime: DateTime<Utc>) -> Article {
    Article {
        id,
        title: format!("article {}", id),
        content: format!("body of article {}", id),
        author_id: 1,
        status: ArticleStatus::Published,
        ctime: utime,
        utime,
    }
}

/// Published articles served newest first.
#[derive(Default)]
pub struct FakeArticles {
    articles: Vec<Article>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeArticles {
    pub fn new(mut articles: Vec<Article>) -> Self {
        articles.sort_by(|a, b| b.utime.cmp(&a.utime).then(b.id.cmp(&a.id)));
        Self {
            articles,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArticleService for FakeArticles {
    async fn list_pub(&self, before: DateTime<Utc>, offset: usize, limit: usize) -> Result<Vec<Article>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Storage("articles unavailable".to_string()));
        }
        Ok(self
            .articles
            .iter()
            .filter(|a| a.utime < before)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// An article store that never answers.
pub struct HangingArticles;

#[async_trait]
impl ArticleService for HangingArticles {
    async fn list_pub(&self, _: DateTime<Utc>, _: usize, _: usize) -> Result<Vec<Article>> {
        std::future::pending().await
    }
}

/// Like counters by article id.
#[derive(Default)]
pub struct FakeInteractives {
    likes: HashMap<i64, i64>,
    pub requests: Mutex<Vec<Vec<i64>>>,
}

impl FakeInteractives {
    pub fn new(likes: impl IntoIterator<Item = (i64, i64)>) -> Self {
        Self {
            likes: likes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Vec<i64>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InteractiveService for FakeInteractives {
    async fn get_by_ids(&self, biz: &str, ids: &[i64]) -> Result<HashMap<i64, Interactive>> {
        assert_eq!(biz, ARTICLE_BIZ);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(ids.to_vec());
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.likes.get(id).map(|likes| {
                    (
                        *id,
                        Interactive {
                            biz: biz.to_string(),
                            biz_id: *id,
                            like_cnt: *likes,
                            ..Interactive::default()
                        },
                    )
                })
            })
            .collect())
    }
}
