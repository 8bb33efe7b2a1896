//! Shared cache abstraction.

use async_trait::async_trait;
use std::time::Duration;

use crate::Result;

/// A byte-oriented cache shared by every process of a deployment.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Fetch a value. Missing and expired keys both return `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
}
