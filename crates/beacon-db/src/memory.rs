//! In-memory backends.
//!
//! Same semantics as the PostgreSQL implementations, scoped to one process.
//! Used for single-node development and throughout the test suites.

use async_trait::async_trait;
use beacon_core::HolderId;
use beacon_core::cache::SharedCache;
use beacon_core::job::JobStatus;
use beacon_core::lease::LeaseStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::repo::job::{JobRecord, JobStore, NewJob};
use crate::{DbError, DbResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Job table held in a map.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<JobTable>,
}

#[derive(Default)]
struct JobTable {
    next_id: i64,
    rows: BTreeMap<i64, JobRecord>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<JobRecord> {
        lock(&self.inner).rows.get(&id).cloned()
    }

    /// Overwrite a row, e.g. to simulate a heartbeat that stopped long ago.
    pub fn put(&self, record: JobRecord) {
        lock(&self.inner).rows.insert(record.id, record);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_candidate(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> DbResult<Option<JobRecord>> {
        let waiting = JobStatus::Waiting.as_i16();
        let running = JobStatus::Running.as_i16();
        let table = lock(&self.inner);
        Ok(table
            .rows
            .values()
            .filter(|r| {
                (r.status == waiting && r.next_time <= now)
                    || (r.status == running && r.utime <= stale_before)
            })
            .min_by_key(|r| r.next_time)
            .cloned())
    }

    async fn try_claim(&self, id: i64, version: i64, now: DateTime<Utc>) -> DbResult<bool> {
        let mut table = lock(&self.inner);
        match table.rows.get_mut(&id) {
            Some(row) if row.version == version => {
                row.status = JobStatus::Running.as_i16();
                row.version += 1;
                row.utime = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_utime(&self, id: i64, version: i64) -> DbResult<bool> {
        let mut table = lock(&self.inner);
        match table.rows.get_mut(&id) {
            Some(row) if row.version == version && row.status == JobStatus::Running.as_i16() => {
                row.utime = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: i64, version: i64) -> DbResult<bool> {
        let mut table = lock(&self.inner);
        match table.rows.get_mut(&id) {
            Some(row) if row.version == version && row.status == JobStatus::Running.as_i16() => {
                row.status = JobStatus::Waiting.as_i16();
                row.version += 1;
                row.utime = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stop(&self, id: i64, version: i64) -> DbResult<bool> {
        let mut table = lock(&self.inner);
        match table.rows.get_mut(&id) {
            Some(row) if row.version == version => {
                row.status = JobStatus::Paused.as_i16();
                row.version += 1;
                row.utime = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_next_time(
        &self,
        id: i64,
        version: i64,
        next: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut table = lock(&self.inner);
        match table.rows.get_mut(&id) {
            Some(row) if row.version == version => {
                row.next_time = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert(&self, job: &NewJob) -> DbResult<JobRecord> {
        let mut table = lock(&self.inner);

        if let Some(row) = table.rows.values_mut().find(|r| r.name == job.name) {
            row.cron = job.cron.clone();
            row.executor = job.executor.clone();
            row.cfg = job.cfg.clone();
            return Ok(row.clone());
        }

        table.next_id += 1;
        let now = Utc::now();
        let record = JobRecord {
            id: table.next_id,
            name: job.name.clone(),
            cron: job.cron.clone(),
            executor: job.executor.clone(),
            cfg: job.cfg.clone(),
            status: JobStatus::Waiting.as_i16(),
            version: 0,
            next_time: job.next_time,
            ctime: now,
            utime: now,
        };
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_name(&self, name: &str) -> DbResult<JobRecord> {
        lock(&self.inner)
            .rows
            .values()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job {}", name)))
    }

    async fn list(&self) -> DbResult<Vec<JobRecord>> {
        let mut records: Vec<_> = lock(&self.inner).rows.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

/// Lease table held in a map, expiring on the monotonic clock.
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, (HolderId, Instant)>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live holder of `key`.
    pub fn holder(&self, key: &str) -> Option<HolderId> {
        lock(&self.leases)
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(holder, _)| *holder)
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder: HolderId,
        ttl: Duration,
    ) -> beacon_core::Result<bool> {
        let now = Instant::now();
        let mut leases = lock(&self.leases);
        match leases.get(key) {
            Some((current, expires_at)) if *current != holder && *expires_at > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), (holder, now + ttl));
                Ok(true)
            }
        }
    }

    async fn refresh(&self, key: &str, holder: HolderId, ttl: Duration) -> beacon_core::Result<bool> {
        let now = Instant::now();
        let mut leases = lock(&self.leases);
        match leases.get_mut(key) {
            Some((current, expires_at)) if *current == holder && *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, holder: HolderId) -> beacon_core::Result<bool> {
        let mut leases = lock(&self.leases);
        match leases.get(key) {
            Some((current, _)) if *current == holder => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Shared cache held in a map. Only shared within one process.
#[derive(Default)]
pub struct MemorySharedCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> beacon_core::Result<Option<Vec<u8>>> {
        Ok(lock(&self.entries)
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> beacon_core::Result<()> {
        lock(&self.entries).insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}
