//! Executor trait.
//!
//! Executors run the work behind a job. The scheduler resolves one by the
//! job's `executor` name and calls `exec` once per preemption.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::job::Job;

/// Trait for job executors.
///
/// Execution is at-least-once: a job may run again after a crash or a lost
/// lease, so implementations must be idempotent.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name this executor is registered under.
    fn name(&self) -> &str;

    /// Run `job` to completion.
    ///
    /// `cancel` fires when the owning scheduler shuts down. The scheduler does
    /// not abort executions, so long-running executors should watch it and
    /// return early.
    async fn exec(&self, job: &Job, cancel: &CancellationToken) -> Result<()>;
}
