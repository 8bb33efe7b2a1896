//! Article and interaction types consumed by ranking.
//!
//! Articles and their counters are owned by other services; this crate only
//! defines the read contracts the ranking engine relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;

/// Business key under which article counters are stored.
pub const ARTICLE_BIZ: &str = "article";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    #[default]
    Unknown,
    Unpublished,
    Published,
    Private,
}

impl ArticleStatus {
    /// Column value stored in `published_articles.status`.
    pub fn as_i16(self) -> i16 {
        match self {
            ArticleStatus::Unknown => 0,
            ArticleStatus::Unpublished => 1,
            ArticleStatus::Published => 2,
            ArticleStatus::Private => 3,
        }
    }
}

impl From<i16> for ArticleStatus {
    fn from(value: i16) -> Self {
        match value {
            1 => ArticleStatus::Unpublished,
            2 => ArticleStatus::Published,
            3 => ArticleStatus::Private,
            _ => ArticleStatus::Unknown,
        }
    }
}

/// A published article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    /// Full body. Emptied before a ranking snapshot leaves the process.
    #[serde(default)]
    pub content: String,
    pub author_id: i64,
    pub status: ArticleStatus,
    pub ctime: DateTime<Utc>,
    /// Time of the last publication, used as the publish time.
    pub utime: DateTime<Utc>,
}

impl Article {
    /// Copy of this article without its body.
    pub fn without_content(&self) -> Self {
        Self {
            content: String::new(),
            title: self.title.clone(),
            ..*self
        }
    }
}

/// Interaction counters for one business object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactive {
    pub biz: String,
    pub biz_id: i64,
    pub read_cnt: i64,
    pub like_cnt: i64,
    pub collect_cnt: i64,
}

#[async_trait]
pub trait ArticleService: Send + Sync {
    /// Published articles with a publish time before `before`, newest first.
    async fn list_pub(&self, before: DateTime<Utc>, offset: usize, limit: usize) -> Result<Vec<Article>>;
}

#[async_trait]
pub trait InteractiveService: Send + Sync {
    /// Counters keyed by business id. Ids without counters are absent from the map.
    async fn get_by_ids(&self, biz: &str, ids: &[i64]) -> Result<HashMap<i64, Interactive>>;
}
