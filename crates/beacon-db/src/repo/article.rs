//! Read-only access to published articles and their interaction counters.

use async_trait::async_trait;
use beacon_core::article::{
    Article, ArticleService, ArticleStatus, Interactive, InteractiveService,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::{DbError, DbResult};

/// A published article row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleRecord {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub author_id: i64,
    pub status: i16,
    pub ctime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

impl From<ArticleRecord> for Article {
    fn from(record: ArticleRecord) -> Self {
        Article {
            id: record.id,
            title: record.title,
            content: record.content,
            author_id: record.author_id,
            status: ArticleStatus::from(record.status),
            ctime: record.ctime,
            utime: record.utime,
        }
    }
}

/// An interaction counter row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InteractiveRecord {
    pub biz: String,
    pub biz_id: i64,
    pub read_cnt: i64,
    pub like_cnt: i64,
    pub collect_cnt: i64,
}

impl From<InteractiveRecord> for Interactive {
    fn from(record: InteractiveRecord) -> Self {
        Interactive {
            biz: record.biz,
            biz_id: record.biz_id,
            read_cnt: record.read_cnt,
            like_cnt: record.like_cnt,
            collect_cnt: record.collect_cnt,
        }
    }
}

/// Pages through `published_articles`.
pub struct PgArticleReader {
    pool: PgPool,
}

impl PgArticleReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_published(
        &self,
        before: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> DbResult<Vec<ArticleRecord>> {
        let offset = i64::try_from(offset)
            .map_err(|_| DbError::InvalidRecord(format!("offset {} out of range", offset)))?;
        let limit = i64::try_from(limit)
            .map_err(|_| DbError::InvalidRecord(format!("limit {} out of range", limit)))?;

        let records = sqlx::query_as::<_, ArticleRecord>(
            r#"
            SELECT id, title, content, author_id, status, ctime, utime
            FROM published_articles
            WHERE utime < $1 AND status = $2
            ORDER BY utime DESC, id DESC
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(before)
        .bind(ArticleStatus::Published.as_i16())
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl ArticleService for PgArticleReader {
    async fn list_pub(
        &self,
        before: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> beacon_core::Result<Vec<Article>> {
        let records = self.list_published(before, offset, limit).await?;
        Ok(records.into_iter().map(Article::from).collect())
    }
}

/// Bulk lookups against `interactives`.
pub struct PgInteractiveReader {
    pool: PgPool,
}

impl PgInteractiveReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InteractiveService for PgInteractiveReader {
    async fn get_by_ids(
        &self,
        biz: &str,
        ids: &[i64],
    ) -> beacon_core::Result<HashMap<i64, Interactive>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let records = sqlx::query_as::<_, InteractiveRecord>(
            r#"
            SELECT biz, biz_id, read_cnt, like_cnt, collect_cnt
            FROM interactives
            WHERE biz = $1 AND biz_id = ANY($2)
            "#,
        )
        .bind(biz)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(records
            .into_iter()
            .map(|r| (r.biz_id, Interactive::from(r)))
            .collect())
    }
}
