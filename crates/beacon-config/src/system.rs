//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use beacon_core::job::CronParser;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSettings,
    pub ranking: RankingSettings,
    /// Jobs upserted into the job table at startup.
    pub jobs: Vec<SeedJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Tuning for the preemption loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum number of jobs executing at once in this process.
    pub capacity: usize,
    /// Deadline for a single preemption attempt.
    pub preempt_timeout: Duration,
    /// Deadline for heartbeat, release and reschedule calls.
    pub store_timeout: Duration,
    /// Heartbeat period for running jobs.
    pub refresh_interval: Duration,
    /// A running job whose heartbeat is older than this may be reclaimed.
    pub lease_expiry: Duration,
    /// Sleep after a scan that found nothing due.
    pub idle_backoff: Duration,
    /// Upper bound of the random delay added to `idle_backoff`.
    pub idle_jitter: Duration,
    /// Sleep after a failed or timed out preemption.
    pub error_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            capacity: 200,
            preempt_timeout: Duration::from_secs(1),
            store_timeout: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(10),
            lease_expiry: Duration::from_secs(60),
            idle_backoff: Duration::from_millis(500),
            idle_jitter: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Ranking computation and lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSettings {
    pub n: usize,
    pub batch_size: usize,
    /// Articles published longer ago than this end the scan.
    pub horizon: Duration,
    pub job_timeout: Duration,
    pub lock_key: String,
    pub lock_acquire_timeout: Duration,
    pub lock_retry_interval: Duration,
    pub lock_refresh_timeout: Duration,
    pub local_ttl: Duration,
    pub shared_key: String,
    pub shared_ttl: Duration,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            n: 100,
            batch_size: 100,
            horizon: Duration::from_secs(7 * 24 * 60 * 60),
            job_timeout: Duration::from_secs(30),
            lock_key: "ranking_job".to_string(),
            lock_acquire_timeout: Duration::from_secs(1),
            lock_retry_interval: Duration::from_millis(100),
            lock_refresh_timeout: Duration::from_secs(1),
            local_ttl: Duration::from_secs(10 * 60),
            shared_key: "ranking".to_string(),
            shared_ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// A job definition from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedJob {
    pub name: String,
    pub cron: String,
    pub executor: String,
    pub cfg: String,
}

/// Read and parse a config file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "database" => parse_database(node, &mut config.database)?,
            "scheduler" => parse_scheduler(node, &mut config.scheduler)?,
            "ranking" => parse_ranking(node, &mut config.ranking)?,
            "job" => config.jobs.push(parse_job(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    validate(&config)?;
    Ok(config)
}

fn parse_database(node: &KdlNode, database: &mut DatabaseConfig) -> ConfigResult<()> {
    if let Some(url) = get_string_prop(node, "url") {
        database.url = Some(url);
    }
    if let Some(max) = get_u64_prop(node, "max-connections")? {
        database.max_connections = u32::try_from(max).map_err(|_| ConfigError::InvalidValue {
            field: "max-connections".to_string(),
            message: format!("{} is too large", max),
        })?;
    }
    Ok(())
}

fn parse_scheduler(node: &KdlNode, settings: &mut SchedulerSettings) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let field = child.name().value();
        match field {
            "capacity" => settings.capacity = require_u64(child)? as usize,
            "preempt-timeout-ms" => settings.preempt_timeout = require_millis(child)?,
            "store-timeout-ms" => settings.store_timeout = require_millis(child)?,
            "refresh-interval-ms" => settings.refresh_interval = require_millis(child)?,
            "lease-expiry-ms" => settings.lease_expiry = require_millis(child)?,
            "idle-backoff-ms" => settings.idle_backoff = require_millis(child)?,
            "idle-jitter-ms" => settings.idle_jitter = require_millis(child)?,
            "error-backoff-ms" => settings.error_backoff = require_millis(child)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_ranking(node: &KdlNode, settings: &mut RankingSettings) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "n" => settings.n = require_u64(child)? as usize,
            "batch-size" => settings.batch_size = require_u64(child)? as usize,
            "horizon-hours" => {
                let hours = require_u64(child)?;
                let secs = hours
                    .checked_mul(60 * 60)
                    .ok_or_else(|| invalid("horizon-hours", "is too large"))?;
                settings.horizon = Duration::from_secs(secs);
            }
            "job-timeout-ms" => settings.job_timeout = require_millis(child)?,
            "lock-key" => settings.lock_key = require_string(child)?,
            "lock-acquire-timeout-ms" => settings.lock_acquire_timeout = require_millis(child)?,
            "lock-retry-interval-ms" => settings.lock_retry_interval = require_millis(child)?,
            "lock-refresh-timeout-ms" => settings.lock_refresh_timeout = require_millis(child)?,
            "local-ttl-ms" => settings.local_ttl = require_millis(child)?,
            "shared-key" => settings.shared_key = require_string(child)?,
            "shared-ttl-ms" => settings.shared_ttl = require_millis(child)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_job(node: &KdlNode) -> ConfigResult<SeedJob> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;
    let cron = get_string_prop(node, "cron")
        .ok_or_else(|| ConfigError::MissingField(format!("cron for job '{}'", name)))?;
    let executor = get_string_prop(node, "executor").unwrap_or_else(|| "local".to_string());
    let cfg = get_string_prop(node, "cfg").unwrap_or_default();

    Ok(SeedJob {
        name,
        cron,
        executor,
        cfg,
    })
}

fn validate(config: &SystemConfig) -> ConfigResult<()> {
    let scheduler = &config.scheduler;
    if scheduler.capacity == 0 {
        return Err(invalid("capacity", "must be at least 1"));
    }
    for (field, value) in [
        ("preempt-timeout-ms", scheduler.preempt_timeout),
        ("store-timeout-ms", scheduler.store_timeout),
        ("refresh-interval-ms", scheduler.refresh_interval),
        ("lease-expiry-ms", scheduler.lease_expiry),
    ] {
        if value.is_zero() {
            return Err(invalid(field, "must be greater than zero"));
        }
    }
    if (scheduler.idle_backoff + scheduler.idle_jitter).is_zero() {
        return Err(invalid(
            "idle-backoff-ms",
            "idle-backoff-ms and idle-jitter-ms cannot both be zero",
        ));
    }
    if scheduler.lease_expiry <= scheduler.refresh_interval {
        return Err(invalid(
            "lease-expiry-ms",
            "must be greater than refresh-interval-ms",
        ));
    }

    let ranking = &config.ranking;
    if ranking.n == 0 {
        return Err(invalid("n", "must be at least 1"));
    }
    if ranking.batch_size == 0 {
        return Err(invalid("batch-size", "must be at least 1"));
    }
    // The lock is refreshed every half job timeout.
    if ranking.job_timeout < Duration::from_millis(2) {
        return Err(invalid("job-timeout-ms", "must be at least 2"));
    }
    for (field, value) in [
        ("lock-acquire-timeout-ms", ranking.lock_acquire_timeout),
        ("lock-refresh-timeout-ms", ranking.lock_refresh_timeout),
    ] {
        if value.is_zero() {
            return Err(invalid(field, "must be greater than zero"));
        }
    }

    let parser = CronParser::new();
    let mut names = HashSet::new();
    for job in &config.jobs {
        if !names.insert(job.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("job '{}'", job.name)));
        }
        parser.validate(&job.cron).map_err(|e| ConfigError::InvalidValue {
            field: format!("cron for job '{}'", job.name),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| invalid(name, "expected a non-negative integer")),
    }
}

fn require_u64(node: &KdlNode) -> ConfigResult<u64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| invalid(node.name().value(), "expected a non-negative integer"))
}

fn require_millis(node: &KdlNode) -> ConfigResult<Duration> {
    require_u64(node).map(Duration::from_millis)
}

fn require_string(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(node.name().value().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config.scheduler.capacity, 200);
        assert_eq!(config.scheduler.preempt_timeout, Duration::from_secs(1));
        assert_eq!(config.ranking.n, 100);
        assert_eq!(config.ranking.lock_key, "ranking_job");
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            database url="postgres://localhost/beacon" max-connections=4

            scheduler {
                capacity 8
                refresh-interval-ms 2000
                lease-expiry-ms 10000
                idle-jitter-ms 50
            }

            ranking {
                n 10
                batch-size 50
                horizon-hours 24
                lock-key "ranking_lock"
                shared-ttl-ms 60000
            }

            job "ranking" cron="0 */3 * * * *" executor="ranking_job"
            job "cleanup" cron="0 4 * * *"
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/beacon"));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.scheduler.capacity, 8);
        assert_eq!(config.scheduler.refresh_interval, Duration::from_secs(2));
        assert_eq!(config.scheduler.idle_jitter, Duration::from_millis(50));
        assert_eq!(config.ranking.n, 10);
        assert_eq!(config.ranking.batch_size, 50);
        assert_eq!(config.ranking.horizon, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.ranking.lock_key, "ranking_lock");
        assert_eq!(config.ranking.shared_ttl, Duration::from_secs(60));

        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].executor, "ranking_job");
        assert_eq!(config.jobs[1].executor, "local");
    }

    #[test]
    fn test_reject_zero_capacity() {
        let kdl = r#"
            scheduler {
                capacity 0
            }
        "#;

        let result = parse_system_config(kdl);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_reject_lease_expiry_shorter_than_refresh() {
        let kdl = r#"
            scheduler {
                refresh-interval-ms 5000
                lease-expiry-ms 5000
            }
        "#;

        assert!(parse_system_config(kdl).is_err());
    }

    #[test]
    fn test_reject_invalid_cron() {
        let kdl = r#"job "broken" cron="every tuesday""#;

        let result = parse_system_config(kdl);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_reject_duplicate_job() {
        let kdl = r#"
            job "ranking" cron="0 * * * *"
            job "ranking" cron="30 * * * *"
        "#;

        assert!(matches!(
            parse_system_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    fn invalid_field(kdl: &str) -> String {
        match parse_system_config(kdl).unwrap_err() {
            ConfigError::InvalidValue { field, .. } => field,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_reject_zero_durations() {
        assert_eq!(
            invalid_field("scheduler { refresh-interval-ms 0 }"),
            "refresh-interval-ms"
        );
        assert_eq!(
            invalid_field("scheduler { store-timeout-ms 0 }"),
            "store-timeout-ms"
        );
        assert_eq!(
            invalid_field("scheduler { preempt-timeout-ms 0 }"),
            "preempt-timeout-ms"
        );
        assert_eq!(
            invalid_field("scheduler { idle-backoff-ms 0\n idle-jitter-ms 0 }"),
            "idle-backoff-ms"
        );
        assert_eq!(
            invalid_field("ranking { lock-refresh-timeout-ms 0 }"),
            "lock-refresh-timeout-ms"
        );
        assert_eq!(invalid_field("ranking { job-timeout-ms 0 }"), "job-timeout-ms");
        assert_eq!(invalid_field("ranking { job-timeout-ms 1 }"), "job-timeout-ms");

        // Jitter alone keeps the idle sleep non-zero
        let config = parse_system_config("scheduler { idle-backoff-ms 0 }").unwrap();
        assert!(config.scheduler.idle_backoff.is_zero());
    }

    #[test]
    fn test_reject_overflowing_horizon() {
        let kdl = format!("ranking {{ horizon-hours {} }}", i64::MAX);
        assert_eq!(invalid_field(&kdl), "horizon-hours");
    }

    #[test]
    fn test_job_requires_cron() {
        let kdl = r#"job "ranking""#;

        assert!(matches!(
            parse_system_config(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }
}
