//! Inspect the published ranking.

use anyhow::{Context, Result};
use beacon_db::PgSharedCache;
use beacon_ranking::RankingSharedCache;
use std::sync::Arc;

/// Print the ranking snapshot shared by all scheduler processes.
pub async fn show(config_path: &str, database_url: Option<String>, json: bool) -> Result<()> {
    let (config, pool) = super::connect(config_path, database_url).await?;

    let shared = RankingSharedCache::new(
        Arc::new(PgSharedCache::new(pool.clone())),
        config.ranking.shared_key.clone(),
        config.ranking.shared_ttl,
    );
    let snapshot = shared
        .get()
        .await
        .context("Failed to read ranking snapshot")?;
    pool.close().await;

    let Some(articles) = snapshot else {
        println!("No ranking has been published yet");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&articles)?);
        return Ok(());
    }

    for (rank, article) in articles.iter().enumerate() {
        println!(
            "{:>3}. {} (id {}, published {})",
            rank + 1,
            article.title,
            article.id,
            article.utime.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
