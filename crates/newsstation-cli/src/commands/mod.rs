pub mod news;
pub mod serve;
pub mod sources;

use std::sync::Arc;

use anyhow::Result;

use newsstation_core::{
    sources::SourceRegistry, storage::Database, AggregationCache, Aggregator, AppConfig,
    QueryService,
};

/// Wire the registry, cache and aggregator together.
///
/// The archive is only opened when enabled, and then restored into the cache
/// so a fresh process starts warm.
pub async fn build_services(config: &AppConfig) -> Result<QueryService> {
    let registry = SourceRegistry::from_config(config)?;
    let cache = Arc::new(AggregationCache::from_config(config));

    let archive = if config.general.archive_enabled {
        Some(Database::new(config).await?)
    } else {
        None
    };

    let aggregator = Aggregator::new(config, registry, cache, archive);
    if config.general.archive_enabled {
        if let Err(e) = aggregator
            .restore_from_archive(config.general.archive_retention_days)
            .await
        {
            tracing::warn!("Failed to restore cache from archive: {}", e);
        }
    }

    Ok(QueryService::new(config, aggregator))
}
