//! Lease table backing distributed locks.
//!
//! Expiry is evaluated against the database clock so that holders on hosts
//! with skewed clocks still agree on who owns a key.

use async_trait::async_trait;
use beacon_core::HolderId;
use beacon_core::lease::LeaseStore;
use sqlx::PgPool;
use std::time::Duration;

use crate::DbError;

/// PostgreSQL implementation of LeaseStore.
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder: HolderId,
        ttl: Duration,
    ) -> beacon_core::Result<bool> {
        let acquired = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO distributed_locks (key, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE distributed_locks.expires_at <= NOW()
               OR distributed_locks.holder = EXCLUDED.holder
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(holder.as_uuid())
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(acquired.is_some())
    }

    async fn refresh(&self, key: &str, holder: HolderId, ttl: Duration) -> beacon_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE distributed_locks SET expires_at = NOW() + make_interval(secs => $3)
            WHERE key = $1 AND holder = $2 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .bind(holder.as_uuid())
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, holder: HolderId) -> beacon_core::Result<bool> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(holder.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected() == 1)
    }
}
