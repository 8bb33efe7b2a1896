//! Job definitions and schedule evaluation.

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

/// Lifecycle state of a schedulable job.
///
/// `Waiting -> Running -> {Waiting | Paused}`. Every transition bumps the
/// job's version, which is the optimistic concurrency token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum JobStatus {
    Waiting = 0,
    Running = 1,
    Paused = 2,
}

impl JobStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for JobStatus {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self> {
        match value {
            0 => Ok(JobStatus::Waiting),
            1 => Ok(JobStatus::Running),
            2 => Ok(JobStatus::Paused),
            other => Err(Error::InvalidInput(format!("unknown job status {}", other))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Paused => write!(f, "paused"),
        }
    }
}

/// A schedulable job as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Unique, human readable key.
    pub name: String,
    /// Cron expression describing the recurrence.
    pub cron: String,
    /// Name of the executor that runs this job.
    pub executor: String,
    /// Opaque executor configuration.
    pub cfg: String,
    pub status: JobStatus,
    /// Version observed when this value was read. After a successful preemption
    /// this is the version written by the claim.
    pub version: i64,
    pub next_time: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

impl Job {
    /// Next invocation strictly after `after`, or `None` when the schedule has
    /// no future occurrence.
    pub fn next_time(&self, parser: &CronParser, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        parser.next_after(&self.cron, after)
    }
}

/// Stateless cron evaluator.
///
/// Accepts the classic five-field form (`min hour dom month dow`), the
/// six/seven-field form with seconds (and optional year), and the `@hourly`
/// style descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronParser;

impl CronParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse an expression into a schedule.
    pub fn parse(&self, expr: &str) -> Result<Schedule> {
        let trimmed = expr.trim();
        let normalized = if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        Schedule::from_str(&normalized).map_err(|e| Error::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })
    }

    /// Validate an expression without evaluating it.
    pub fn validate(&self, expr: &str) -> Result<()> {
        self.parse(expr).map(|_| ())
    }

    pub fn next_after(&self, expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let schedule = self.parse(expr)?;
        Ok(schedule.after(&after).next())
    }
}
