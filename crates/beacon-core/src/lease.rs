//! Lease storage.
//!
//! A lease is a keyed, time-bounded claim owned by a single holder. The
//! store is the only arbiter: every operation is a single atomic step, so
//! two holders racing on the same key see exactly one winner.

use async_trait::async_trait;
use std::time::Duration;

use crate::{HolderId, Result};

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim `key` for `holder` for `ttl`.
    ///
    /// Succeeds when the key is free, expired, or already held by `holder`.
    async fn try_acquire(&self, key: &str, holder: HolderId, ttl: Duration) -> Result<bool>;

    /// Extend the lease to `ttl` from now. Returns false when `holder` no
    /// longer owns the key.
    async fn refresh(&self, key: &str, holder: HolderId, ttl: Duration) -> Result<bool>;

    /// Drop the lease. Returns false when `holder` did not own the key.
    async fn release(&self, key: &str, holder: HolderId) -> Result<bool>;
}
