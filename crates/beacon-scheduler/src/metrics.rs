//! Prometheus instruments for job execution.

use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder, core::Collector};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Job run times range from milliseconds to the lease expiry.
const JOB_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Handle to the scheduler's metric instruments. Clones share the registry.
#[derive(Clone)]
pub struct SchedulerMetrics {
    registry: Arc<Registry>,
    job_duration: HistogramVec,
}

impl SchedulerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let job_duration = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new("job_duration_seconds", "Time spent executing a job")
                    .buckets(JOB_DURATION_BUCKETS.to_vec()),
                &["name", "success"],
            )?,
        );

        Ok(Self {
            registry: Arc::new(registry),
            job_duration,
        })
    }

    /// Record one execution of the job called `name`.
    pub fn record_job(&self, name: &str, success: bool, elapsed: Duration) {
        let success = if success { "true" } else { "false" };
        self.job_duration
            .with_label_values(&[name, success])
            .observe(elapsed.as_secs_f64());
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Everything gathered so far in the Prometheus text format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: C) -> C {
    if let Err(e) = registry.register(Box::new(metric.clone())) {
        warn!(error = %e, "Failed to register metric");
    }
    metric
}
