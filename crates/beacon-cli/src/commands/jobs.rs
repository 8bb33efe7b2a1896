//! Job table listing.

use anyhow::{Context, Result};
use beacon_db::{JobStore, PgJobStore};
use beacon_scheduler::JobService;
use std::sync::Arc;

pub async fn list(config_path: &str, database_url: Option<String>) -> Result<()> {
    let (config, pool) = super::connect(config_path, database_url).await?;

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let jobs = JobService::new(store, config.scheduler)
        .list()
        .await
        .context("Failed to list jobs")?;
    pool.close().await;

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!(
        "{:<6} {:<24} {:<16} {:<8} {:<8} NEXT RUN",
        "ID", "NAME", "EXECUTOR", "STATUS", "VERSION"
    );
    for job in jobs {
        println!(
            "{:<6} {:<24} {:<16} {:<8} {:<8} {}",
            job.id,
            job.name,
            job.executor,
            job.status.to_string(),
            job.version,
            job.next_time.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
