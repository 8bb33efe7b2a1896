//! CLI command implementations.

pub mod jobs;
pub mod ranking;
pub mod run;

use anyhow::{Context, Result};
use beacon_config::{SystemConfig, load_system_config};
use beacon_db::create_pool;
use sqlx::PgPool;

pub fn validate(path: &str) -> Result<()> {
    match load_system_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  scheduler capacity: {}", config.scheduler.capacity);
            println!("  ranking size: {}", config.ranking.n);
            for job in &config.jobs {
                println!("  job {} ({}) on {}", job.name, job.cron, job.executor);
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load the config file and connect to its database.
pub(crate) async fn connect(
    config_path: &str,
    database_url: Option<String>,
) -> Result<(SystemConfig, PgPool)> {
    let config = load_system_config(config_path)
        .with_context(|| format!("Failed to load config file: {}", config_path))?;

    let url = database_url
        .or_else(|| config.database.url.clone())
        .context("No database URL, set DATABASE_URL or `database url=...` in the config")?;

    let pool = create_pool(&url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;

    Ok((config, pool))
}
