//! Executor lookup and the built-in executors.

use async_trait::async_trait;
use beacon_core::executor::Executor;
use beacon_core::job::Job;
use beacon_core::{Error, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::metrics::SchedulerMetrics;

/// Executors by name.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
    metrics: Option<SchedulerMetrics>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose executors record run times into `metrics`.
    pub fn with_metrics(metrics: SchedulerMetrics) -> Self {
        Self {
            executors: HashMap::new(),
            metrics: Some(metrics),
        }
    }

    /// Add `executor` under its own name, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let name = executor.name().to_string();
        let instrumented = InstrumentedExecutor::new(executor, self.metrics.clone());
        self.executors.insert(name, Arc::new(instrumented));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}

type LocalFunc = Arc<dyn Fn(Job, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Runs in-process functions keyed by job name.
#[derive(Default)]
pub struct LocalFuncExecutor {
    funcs: HashMap<String, LocalFunc>,
}

impl LocalFuncExecutor {
    pub const NAME: &'static str = "local";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, job_name: impl Into<String>, func: F)
    where
        F: Fn(Job, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.funcs.insert(job_name.into(), Arc::new(func));
    }
}

#[async_trait]
impl Executor for LocalFuncExecutor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn exec(&self, job: &Job, cancel: &CancellationToken) -> Result<()> {
        let func = self
            .funcs
            .get(&job.name)
            .ok_or_else(|| Error::NotFound(format!("local function for job '{}'", job.name)))?;
        func(job.clone(), cancel.clone()).await
    }
}

/// Wraps an executor with a span, outcome logs and a run time histogram.
pub struct InstrumentedExecutor {
    inner: Arc<dyn Executor>,
    metrics: Option<SchedulerMetrics>,
}

impl InstrumentedExecutor {
    pub fn new(inner: Arc<dyn Executor>, metrics: Option<SchedulerMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl Executor for InstrumentedExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exec(&self, job: &Job, cancel: &CancellationToken) -> Result<()> {
        let span = info_span!(
            "job",
            job_id = job.id,
            name = %job.name,
            executor = %self.inner.name(),
            version = job.version,
        );

        async {
            let started = Instant::now();
            info!("Job started");
            let result = self.inner.exec(job, cancel).await;
            let elapsed = started.elapsed();
            if let Some(metrics) = &self.metrics {
                metrics.record_job(&job.name, result.is_ok(), elapsed);
            }
            let elapsed_ms = elapsed.as_millis() as u64;
            match &result {
                Ok(()) => info!(elapsed_ms, "Job finished"),
                Err(e) => error!(elapsed_ms, error = %e, "Job failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
