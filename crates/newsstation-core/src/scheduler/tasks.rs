use std::collections::HashMap;

use tokio::time::Instant;

use crate::aggregator::Aggregator;
use crate::config::AppConfig;
use crate::news::Category;
use crate::Result;

/// Outcome of one cache warm-up pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Sources refetched in this pass
    pub refreshed: u32,
    /// Sources whose refresh interval had not elapsed yet
    pub skipped: u32,
    pub articles: usize,
    pub failed_sources: Vec<String>,
}

/// Refetch every source whose own refresh interval has elapsed since it was
/// last warmed. `last_warmed` is updated for each attempted source, failed or not.
///
/// A fetch is stored under every category the source serves, so one forced
/// `realtime` fetch per source warms the whole cache.
pub async fn warm_due_sources(
    aggregator: &Aggregator,
    last_warmed: &mut HashMap<String, Instant>,
    now: Instant,
) -> WarmReport {
    let mut report = WarmReport::default();
    let registry = aggregator.registry();

    for source in registry.all() {
        let source_id = source.info().id.as_str();
        let interval = registry.refresh_interval(source_id);

        let due = match last_warmed.get(source_id) {
            Some(last) => now.saturating_duration_since(*last) >= interval,
            None => true,
        };
        if !due {
            report.skipped += 1;
            continue;
        }

        last_warmed.insert(source_id.to_string(), now);
        report.refreshed += 1;

        match aggregator
            .get_source_articles(source_id, Category::Realtime, true)
            .await
        {
            Ok(aggregation) => {
                report.articles += aggregation.articles.len();
                if !aggregation.failures.is_empty() {
                    report.failed_sources.push(source_id.to_string());
                }
            }
            Err(e) => {
                tracing::warn!("Failed to warm {}: {}", source_id, e);
                report.failed_sources.push(source_id.to_string());
            }
        }
    }

    if report.refreshed > 0 {
        tracing::info!(
            "Warmed {} sources ({} not due): {} articles, {} failing",
            report.refreshed,
            report.skipped,
            report.articles,
            report.failed_sources.len()
        );
    }
    report
}

/// Delete archived articles past the retention window
pub async fn prune_archive(aggregator: &Aggregator, config: &AppConfig) -> Result<u64> {
    if !config.general.archive_enabled {
        return Ok(0);
    }

    let deleted = aggregator
        .prune_archive(config.general.archive_retention_days)
        .await?;

    if deleted > 0 {
        tracing::info!("Pruned {} archived articles", deleted);
    }

    Ok(deleted)
}
