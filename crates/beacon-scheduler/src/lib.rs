//! Preemptive job scheduling for beacon.
//!
//! Jobs live in a shared table. Every process runs a [`Scheduler`] that
//! claims due jobs with an optimistic version check, keeps the claim alive
//! while the job runs, then schedules the next run from the job's cron.
//! [`LockClient`] provides the keyed distributed locks executors use to
//! run at most once across the deployment.

pub mod handle;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod service;

pub use handle::JobHandle;
pub use lock::{Lock, LockClient, LockError, LockResult, RetryPolicy};
pub use metrics::SchedulerMetrics;
pub use registry::{ExecutorRegistry, InstrumentedExecutor, LocalFuncExecutor};
pub use repository::JobRepository;
pub use scheduler::Scheduler;
pub use service::JobService;
