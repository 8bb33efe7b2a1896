//! Long running scheduler process.

use anyhow::{Context, Result};
use beacon_config::RankingSettings;
use beacon_db::{
    JobStore, PgArticleReader, PgInteractiveReader, PgJobStore, PgLeaseStore, PgSharedCache,
    run_migrations,
};
use beacon_ranking::{
    RankingCache, RankingComputer, RankingJob, RankingLocalCache, RankingService,
    RankingSharedCache, register_local,
};
use beacon_scheduler::{
    ExecutorRegistry, JobService, LocalFuncExecutor, LockClient, Scheduler, SchedulerMetrics,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub async fn run_scheduler(config_path: &str, database_url: Option<String>) -> Result<()> {
    let (config, pool) = super::connect(config_path, database_url).await?;

    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations complete");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let service = Arc::new(JobService::new(store, config.scheduler.clone()));

    for seed in &config.jobs {
        let job = service
            .upsert(&seed.name, &seed.cron, &seed.executor, &seed.cfg)
            .await
            .with_context(|| format!("Failed to register job '{}'", seed.name))?;
        info!(job_id = job.id, name = %job.name, status = %job.status, next_time = %job.next_time, "Registered job");
    }

    let ranking = ranking_service(&pool, &config.ranking);
    let ranking_job = Arc::new(RankingJob::new(
        ranking.clone(),
        LockClient::new(Arc::new(PgLeaseStore::new(pool.clone()))),
        config.ranking.clone(),
    ));

    let mut local = LocalFuncExecutor::new();
    register_local(&mut local, ranking, config.ranking.job_timeout);

    let metrics = SchedulerMetrics::new().context("Failed to create scheduler metrics")?;
    let mut registry = ExecutorRegistry::with_metrics(metrics.clone());
    registry.register(Arc::new(local));
    registry.register(ranking_job.clone());

    let scheduler = Scheduler::new(registry, service);
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        }
    });

    scheduler.run(shutdown).await;

    info!("Waiting for running jobs to finish");
    scheduler.wait_idle().await;

    if let Err(e) = ranking_job.close().await {
        warn!(error = %e, "Failed to release ranking lock");
    }
    pool.close().await;

    match metrics.render() {
        Ok(text) => debug!(metrics = %text, "Final job metrics"),
        Err(e) => warn!(error = %e, "Failed to render job metrics"),
    }

    info!("Shutdown complete");
    Ok(())
}

fn ranking_service(pool: &PgPool, settings: &RankingSettings) -> Arc<RankingService> {
    let computer = RankingComputer::new(
        Arc::new(PgArticleReader::new(pool.clone())),
        Arc::new(PgInteractiveReader::new(pool.clone())),
        settings,
    );
    let cache = Arc::new(RankingCache::new(
        RankingLocalCache::new(settings.local_ttl),
        RankingSharedCache::new(
            Arc::new(PgSharedCache::new(pool.clone())),
            settings.shared_key.clone(),
            settings.shared_ttl,
        ),
    ));

    Arc::new(RankingService::new(computer, cache))
}
