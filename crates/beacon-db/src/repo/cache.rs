//! Shared cache tier stored in PostgreSQL.

use async_trait::async_trait;
use beacon_core::cache::SharedCache;
use sqlx::PgPool;
use std::time::Duration;

use crate::DbError;

/// PostgreSQL implementation of SharedCache.
pub struct PgSharedCache {
    pool: PgPool,
}

impl PgSharedCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SharedCache for PgSharedCache {
    async fn get(&self, key: &str) -> beacon_core::Result<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM cache_entries WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> beacon_core::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(())
    }
}
