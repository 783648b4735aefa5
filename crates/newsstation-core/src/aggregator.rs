//! Fan-out of one category request over every source serving it

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::cache::{AggregationCache, CacheEntry, CacheKey, CacheOutcome};
use crate::config::AppConfig;
use crate::error::FetchFailureKind;
use crate::news::{Article, Category};
use crate::sources::{NewsSource, SourceRegistry};
use crate::storage::{ArticleRepository, Database};
use crate::{Error, Result};

/// A source that could not be refreshed during an aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub message: String,
    /// Older cached articles were served in place of a fresh fetch
    pub served_stale: bool,
}

/// Merged result of one category across its sources
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub category: Category,
    /// Articles in registry order, grouped by source
    pub articles: Vec<Article>,
    pub failures: Vec<SourceFailure>,
    /// Most recent fetch time among the contributing sources
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Aggregation {
    fn empty(category: Category) -> Self {
        Self {
            category,
            articles: Vec::new(),
            failures: Vec::new(),
            fetched_at: None,
        }
    }

    pub fn failed_source_ids(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.source_id.clone()).collect()
    }
}

enum SourceResult {
    Served(CacheEntry),
    Stale(CacheEntry, String),
    Failed(Error),
}

#[derive(Clone)]
pub struct Aggregator {
    registry: SourceRegistry,
    cache: Arc<AggregationCache>,
    archive: Option<Database>,
    fetch_limit: usize,
    timeout: Duration,
    concurrency: usize,
}

impl Aggregator {
    pub fn new(
        config: &AppConfig,
        registry: SourceRegistry,
        cache: Arc<AggregationCache>,
        archive: Option<Database>,
    ) -> Self {
        Self {
            registry,
            cache,
            archive,
            fetch_limit: config.feed.source_fetch_limit,
            timeout: Duration::from_secs(config.sync.request_timeout_secs),
            concurrency: config.sync.fetch_concurrency.max(1),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<AggregationCache> {
        &self.cache
    }

    /// Articles of every source serving `category`.
    ///
    /// Sources are refreshed concurrently, at most `fetch_concurrency` at a time.
    /// A failing source contributes its last cached articles if it has any and is
    /// otherwise left out; either way it is listed in `failures`.
    pub async fn get_articles(&self, category: Category, refresh: bool) -> Aggregation {
        let sources = self.registry.for_category(category);
        if sources.is_empty() {
            tracing::debug!("No sources registered for {}", category);
            return Aggregation::empty(category);
        }

        let mut join_set = JoinSet::new();
        let mut results: Vec<(usize, String, SourceResult)> = Vec::with_capacity(sources.len());

        for (index, source) in sources.into_iter().enumerate() {
            while join_set.len() >= self.concurrency {
                if let Some(joined) = join_set.join_next().await {
                    Self::collect(joined, &mut results);
                }
            }

            let this = self.clone();
            join_set.spawn(async move {
                let source_id = source.info().id.clone();
                let result = this.refresh_source(source, category, refresh).await;
                (index, source_id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            Self::collect(joined, &mut results);
        }
        results.sort_by_key(|(index, _, _)| *index);

        let aggregation = Self::merge(category, results);
        if let Some(fetched_at) = aggregation.fetched_at {
            self.cache
                .put(&CacheKey::all(category), aggregation.articles.clone(), fetched_at);
        }

        if aggregation.failures.is_empty() {
            tracing::info!(
                "Aggregated {} articles for {}",
                aggregation.articles.len(),
                category
            );
        } else {
            tracing::warn!(
                "Aggregated {} articles for {} with {} failed sources: {}",
                aggregation.articles.len(),
                category,
                aggregation.failures.len(),
                aggregation.failed_source_ids().join(", ")
            );
        }

        aggregation
    }

    /// Articles of one source within a category.
    ///
    /// Unknown source is `NotFound`; a source that does not serve the category
    /// yields an empty aggregation.
    pub async fn get_source_articles(
        &self,
        source_id: &str,
        category: Category,
        refresh: bool,
    ) -> Result<Aggregation> {
        let source = self
            .registry
            .get(source_id)
            .ok_or_else(|| Error::NotFound(format!("source '{}'", source_id)))?;

        if !source.serves(category) {
            tracing::debug!("Source {} does not serve {}", source_id, category);
            return Ok(Aggregation::empty(category));
        }

        let result = self.refresh_source(source, category, refresh).await;
        Ok(Self::merge(category, vec![(0, source_id.to_string(), result)]))
    }

    /// Fill the cache from archived snapshots. Returns the number of entries restored.
    pub async fn restore_from_archive(&self, retention_days: u32) -> Result<usize> {
        let Some(db) = &self.archive else {
            return Ok(0);
        };

        let snapshots = ArticleRepository::new(db).load_cached(retention_days).await?;
        let mut restored = 0;
        for snapshot in snapshots {
            if self.registry.get(&snapshot.source_id).is_none() {
                continue;
            }
            let key = CacheKey::source(snapshot.category, &snapshot.source_id);
            if self.cache.put(&key, snapshot.articles, snapshot.fetched_at) {
                restored += 1;
            }
        }

        tracing::info!("Restored {} cached source snapshots from archive", restored);
        Ok(restored)
    }

    /// Persist fetched content so it survives restarts
    pub async fn archive_content(&self, article_id: &str, content: &str) {
        let Some(db) = &self.archive else {
            return;
        };
        if let Err(e) = ArticleRepository::new(db).update_content(article_id, content).await {
            tracing::warn!("Failed to archive content of {}: {}", article_id, e);
        }
    }

    /// Drop archived articles older than the retention window
    pub async fn prune_archive(&self, retention_days: u32) -> Result<u64> {
        match &self.archive {
            Some(db) => ArticleRepository::new(db).cleanup_old(retention_days).await,
            None => Ok(0),
        }
    }

    /// Fetch with the per-call timeout applied; an empty result is a failure
    pub async fn fetch_source(
        &self,
        source: &dyn NewsSource,
        category: Category,
    ) -> Result<Vec<Article>> {
        let source_id = &source.info().id;
        let articles = tokio::time::timeout(
            self.timeout,
            source.fetch_articles(category, self.fetch_limit),
        )
        .await
        .map_err(|_| {
            Error::fetch(
                source_id,
                FetchFailureKind::Timeout,
                format!("no response within {}s", self.timeout.as_secs()),
            )
        })??;

        if articles.is_empty() {
            return Err(Error::fetch(source_id, FetchFailureKind::Empty, "no articles"));
        }
        Ok(articles)
    }

    /// Fetch full content of an article from its source, with the per-call timeout
    pub async fn fetch_content(
        &self,
        source: &dyn NewsSource,
        article: &Article,
    ) -> Result<Option<String>> {
        tokio::time::timeout(self.timeout, source.fetch_content(article))
            .await
            .map_err(|_| {
                Error::fetch(
                    &source.info().id,
                    FetchFailureKind::Timeout,
                    format!("no content within {}s", self.timeout.as_secs()),
                )
            })?
    }

    async fn refresh_source(
        &self,
        source: Arc<dyn NewsSource>,
        category: Category,
        force: bool,
    ) -> SourceResult {
        let key = CacheKey::source(category, &source.info().id);
        let fetched = self
            .cache
            .get_or_refresh(&key, force, || self.fetch_source(source.as_ref(), category))
            .await;

        match fetched {
            Ok((entry, CacheOutcome::Refreshed)) => {
                self.archive_entry(category, &entry).await;
                for other in self.seed_other_categories(source.as_ref(), category, &entry) {
                    self.archive_entry(other, &entry).await;
                }
                SourceResult::Served(entry)
            }
            Ok((entry, CacheOutcome::Hit)) => SourceResult::Served(entry),
            Ok((entry, CacheOutcome::Stale(reason))) => SourceResult::Stale(entry, reason),
            Err(e) => {
                tracing::warn!("Source {} failed for {}: {}", source.info().id, category, e);
                SourceResult::Failed(e)
            }
        }
    }

    /// A fetch answers for every category the source serves, so store it under
    /// each of them. Returns the categories that took the entry.
    fn seed_other_categories(
        &self,
        source: &dyn NewsSource,
        fetched_for: Category,
        entry: &CacheEntry,
    ) -> Vec<Category> {
        let source_id = &source.info().id;
        Category::ALL
            .into_iter()
            .filter(|c| *c != fetched_for && source.serves(*c))
            .filter(|c| {
                self.cache.put(
                    &CacheKey::source(*c, source_id),
                    entry.articles.to_vec(),
                    entry.fetched_at,
                )
            })
            .collect()
    }

    async fn archive_entry(&self, category: Category, entry: &CacheEntry) {
        let Some(db) = &self.archive else {
            return;
        };
        if let Err(e) = ArticleRepository::new(db)
            .upsert_many(category, &entry.articles, entry.fetched_at)
            .await
        {
            tracing::warn!("Failed to archive {} articles: {}", category, e);
        }
    }

    fn collect(
        joined: std::result::Result<(usize, String, SourceResult), tokio::task::JoinError>,
        results: &mut Vec<(usize, String, SourceResult)>,
    ) {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("Source refresh task failed: {}", e),
        }
    }

    fn merge(category: Category, results: Vec<(usize, String, SourceResult)>) -> Aggregation {
        let mut aggregation = Aggregation::empty(category);

        for (_, source_id, result) in results {
            let entry = match result {
                SourceResult::Served(entry) => entry,
                SourceResult::Stale(entry, message) => {
                    aggregation.failures.push(SourceFailure {
                        source_id,
                        message,
                        served_stale: true,
                    });
                    entry
                }
                SourceResult::Failed(e) => {
                    aggregation.failures.push(SourceFailure {
                        source_id,
                        message: e.to_string(),
                        served_stale: false,
                    });
                    continue;
                }
            };

            aggregation.fetched_at = aggregation.fetched_at.max(Some(entry.fetched_at));
            aggregation.articles.extend(entry.articles.iter().cloned());
        }

        aggregation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::MockSource;
    use chrono::Duration as ChronoDuration;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sync.request_timeout_secs = 10;
        config
    }

    fn build(sources: Vec<Arc<MockSource>>) -> Aggregator {
        let mut registry = SourceRegistry::new();
        for source in sources {
            registry.register(source).unwrap();
        }
        let cache = Arc::new(AggregationCache::from_config(&config()));
        Aggregator::new(&config(), registry, cache, None)
    }

    fn source_with(id: &str, prefix: &str, category: Category, titles: &[&str]) -> Arc<MockSource> {
        let source = MockSource::new(id, prefix, category);
        let now = Utc::now();
        let articles = titles
            .iter()
            .enumerate()
            .map(|(i, title)| source.article(i as u32, title, now - ChronoDuration::minutes(i as i64)))
            .collect();
        Arc::new(source.with_articles(articles))
    }

    #[tokio::test]
    async fn test_results_in_registry_order() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0", "a1"]);
        let beta = source_with("beta", "b", Category::World, &["b0"]);
        let aggregator = build(vec![alpha, beta]);

        let aggregation = aggregator.get_articles(Category::Realtime, false).await;
        let ids: Vec<_> = aggregation.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a-0", "a-1", "b-0"]);
        assert!(aggregation.failures.is_empty());
        assert!(aggregation.fetched_at.is_some());

        let merged = aggregator.cache().get(&CacheKey::all(Category::Realtime)).unwrap();
        assert_eq!(merged.articles.len(), 3);
    }

    #[tokio::test]
    async fn test_only_sources_for_category_are_asked() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0"]);
        let beta = source_with("beta", "b", Category::World, &["b0"]);
        let aggregator = build(vec![alpha.clone(), beta.clone()]);

        let aggregation = aggregator.get_articles(Category::World, false).await;
        assert_eq!(aggregation.articles.len(), 1);
        assert_eq!(alpha.fetch_count(), 0);
        assert_eq!(beta.fetch_count(), 1);

        let none = aggregator.get_articles(Category::Health, false).await;
        assert!(none.articles.is_empty());
        assert!(none.fetched_at.is_none());
    }

    #[tokio::test]
    async fn test_failing_source_is_omitted_and_reported() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0", "a1"]);
        let broken = source_with("broken", "x", Category::Technology, &["x0"]);
        broken.set_failing(true);
        let aggregator = build(vec![alpha, broken]);

        let aggregation = aggregator.get_articles(Category::Technology, false).await;
        assert_eq!(aggregation.articles.len(), 2);
        assert_eq!(aggregation.failures.len(), 1);
        assert_eq!(aggregation.failures[0].source_id, "broken");
        assert!(!aggregation.failures[0].served_stale);
    }

    #[tokio::test]
    async fn test_failing_source_falls_back_to_cache() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0"]);
        let aggregator = build(vec![alpha.clone()]);

        aggregator.get_articles(Category::Technology, false).await;
        alpha.set_failing(true);

        let aggregation = aggregator.get_articles(Category::Technology, true).await;
        assert_eq!(alpha.fetch_count(), 2);
        assert_eq!(aggregation.articles.len(), 1);
        assert_eq!(aggregation.failures.len(), 1);
        assert!(aggregation.failures[0].served_stale);
    }

    #[tokio::test]
    async fn test_fresh_cache_is_reused_unless_refresh() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0"]);
        let aggregator = build(vec![alpha.clone()]);

        aggregator.get_articles(Category::Technology, false).await;
        aggregator.get_articles(Category::Technology, false).await;
        assert_eq!(alpha.fetch_count(), 1);

        aggregator.get_articles(Category::Technology, true).await;
        assert_eq!(alpha.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let alpha = MockSource::new("alpha", "a", Category::Technology);
        let article = alpha.article(1, "Story", Utc::now());
        let alpha = Arc::new(
            alpha
                .with_articles(vec![article])
                .with_delay(std::time::Duration::from_secs(2)),
        );
        let aggregator = build(vec![alpha.clone()]);

        let (first, second) = tokio::join!(
            aggregator.get_articles(Category::Technology, false),
            aggregator.get_articles(Category::Technology, false),
        );

        assert_eq!(alpha.fetch_count(), 1);
        assert_eq!(first.articles.len(), 1);
        assert_eq!(second.articles.len(), 1);
        assert!(first.failures.is_empty() && second.failures.is_empty());
    }

    #[tokio::test]
    async fn test_one_fetch_serves_every_category_of_a_source() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0", "a1"]);
        let aggregator = build(vec![alpha.clone()]);

        aggregator.get_articles(Category::Realtime, false).await;
        let tech = aggregator.get_articles(Category::Technology, false).await;

        assert_eq!(alpha.fetch_count(), 1);
        assert_eq!(tech.articles.len(), 2);
        assert!(aggregator
            .cache()
            .get(&CacheKey::source(Category::World, "alpha"))
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_result_is_a_failure() {
        let empty = Arc::new(MockSource::new("empty", "e", Category::Technology));
        let aggregator = build(vec![empty]);

        let aggregation = aggregator.get_articles(Category::Technology, false).await;
        assert!(aggregation.articles.is_empty());
        assert_eq!(aggregation.failures.len(), 1);
        assert!(aggregation.failures[0].message.contains("returned no items"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let slow = MockSource::new("slow", "s", Category::Technology);
        let article = slow.article(1, "late", Utc::now());
        let slow = Arc::new(
            slow.with_articles(vec![article])
                .with_delay(std::time::Duration::from_secs(60)),
        );
        let fast = source_with("fast", "f", Category::Technology, &["f0"]);
        let aggregator = build(vec![slow, fast]);

        let aggregation = aggregator.get_articles(Category::Technology, false).await;
        assert_eq!(aggregation.articles.len(), 1);
        assert_eq!(aggregation.articles[0].id, "f-0");
        assert_eq!(aggregation.failures.len(), 1);
        assert!(aggregation.failures[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrency_bound_still_collects_everything() {
        let mut config = config();
        config.sync.fetch_concurrency = 1;

        let mut registry = SourceRegistry::new();
        for (id, prefix) in [("one", "o"), ("two", "t"), ("three", "h")] {
            registry
                .register(source_with(id, prefix, Category::Science, &["x"]))
                .unwrap();
        }
        let cache = Arc::new(AggregationCache::from_config(&config));
        let aggregator = Aggregator::new(&config, registry, cache, None);

        let aggregation = aggregator.get_articles(Category::Science, false).await;
        let ids: Vec<_> = aggregation.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["o-0", "t-0", "h-0"]);
    }

    #[tokio::test]
    async fn test_source_articles() {
        let alpha = source_with("alpha", "a", Category::Technology, &["a0"]);
        let aggregator = build(vec![alpha]);

        let aggregation = aggregator
            .get_source_articles("alpha", Category::Technology, false)
            .await
            .unwrap();
        assert_eq!(aggregation.articles.len(), 1);

        let other = aggregator
            .get_source_articles("alpha", Category::Sports, false)
            .await
            .unwrap();
        assert!(other.articles.is_empty());

        assert!(matches!(
            aggregator.get_source_articles("nope", Category::Technology, false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let db = Database::new_in_memory().await.unwrap();
        let alpha = source_with("alpha", "a", Category::Technology, &["a0", "a1"]);

        let mut registry = SourceRegistry::new();
        registry.register(alpha).unwrap();
        let first = Aggregator::new(
            &config(),
            registry.clone(),
            Arc::new(AggregationCache::from_config(&config())),
            Some(db.clone()),
        );
        first.get_articles(Category::Technology, false).await;

        let restarted = Aggregator::new(
            &config(),
            registry,
            Arc::new(AggregationCache::from_config(&config())),
            Some(db),
        );
        assert_eq!(restarted.restore_from_archive(3).await.unwrap(), 1);
        let restored = restarted
            .cache()
            .get(&CacheKey::source(Category::Technology, "alpha"))
            .unwrap();
        assert_eq!(restored.articles.len(), 2);
    }
}
