//! Source adapters
//!
//! Every external origin of news implements [`NewsSource`]. Adapters are
//! registered in a [`SourceRegistry`] built from configuration; the aggregator
//! only ever talks to the registry.

mod github_trending;
mod hacker_news;
mod http;
mod reddit;

#[cfg(test)]
pub(crate) mod mock;

pub use github_trending::GitHubTrendingSource;
pub use hacker_news::HackerNewsSource;
pub use http::{html_to_text, HttpFetcher};
pub use reddit::RedditSource;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::news::{Article, Category, SourceInfo};
use crate::{Error, Result};

/// Capability set of one external news source
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Stable id and display name
    fn info(&self) -> &SourceInfo;

    /// Prefix of the article ids this source produces (`hn` for `hn-123`)
    fn id_prefix(&self) -> &str;

    /// Categories this source publishes into. `realtime` is implied.
    fn categories(&self) -> &[Category];

    /// Fetch the current list of articles.
    ///
    /// Malformed upstream items are skipped; an error means the source as a
    /// whole could not be read. The result must not depend on `category` among
    /// the categories the source serves; the aggregator caches one fetch under
    /// all of them.
    async fn fetch_articles(&self, category: Category, limit: usize) -> Result<Vec<Article>>;

    /// Fetch the full content of one article. `Ok(None)` means the source has none.
    async fn fetch_content(&self, article: &Article) -> Result<Option<String>>;

    fn serves(&self, category: Category) -> bool {
        category == Category::Realtime || self.categories().contains(&category)
    }
}

/// Ordered mapping from source id to adapter
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn NewsSource>>,
    refresh_intervals: HashMap<String, Duration>,
}

/// Background refresh interval of sources registered without one
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every adapter enabled in the configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = HttpFetcher::new(config)?;
        let sources = &config.sources;
        let mut registry = Self::new();

        if sources.hacker_news.enabled {
            registry.register_with_interval(
                Arc::new(HackerNewsSource::new(http.clone(), &sources.hacker_news.api_url)),
                Duration::from_secs(sources.hacker_news.refresh_interval_secs),
            )?;
        }

        if sources.github_trending.enabled {
            registry.register_with_interval(
                Arc::new(GitHubTrendingSource::new(http.clone(), &sources.github_trending.url)),
                Duration::from_secs(sources.github_trending.refresh_interval_secs),
            )?;
        }

        if sources.reddit.enabled {
            for subreddit in &sources.reddit.subreddits {
                registry.register_with_interval(
                    Arc::new(RedditSource::new(http.clone(), subreddit)),
                    Duration::from_secs(sources.reddit.refresh_interval_secs),
                )?;
            }
        }

        if registry.is_empty() {
            tracing::warn!("All sources are disabled; every category will be empty");
        } else {
            tracing::info!(
                "Registered {} sources: {}",
                registry.len(),
                registry.ids().join(", ")
            );
        }

        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn NewsSource>) -> Result<()> {
        let id = &source.info().id;
        if self.get(id).is_some() {
            return Err(Error::Config(format!("source '{}' registered twice", id)));
        }
        self.sources.push(source);
        Ok(())
    }

    pub fn register_with_interval(
        &mut self,
        source: Arc<dyn NewsSource>,
        refresh_interval: Duration,
    ) -> Result<()> {
        let id = source.info().id.clone();
        self.register(source)?;
        self.refresh_intervals.insert(id, refresh_interval);
        Ok(())
    }

    /// How often the background warmer refetches a source
    pub fn refresh_interval(&self, id: &str) -> Duration {
        self.refresh_intervals
            .get(id)
            .copied()
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn NewsSource>> {
        self.sources.iter().find(|s| s.info().id == id).cloned()
    }

    /// Adapters serving a category, in registration order
    pub fn for_category(&self, category: Category) -> Vec<Arc<dyn NewsSource>> {
        self.sources
            .iter()
            .filter(|s| s.serves(category))
            .cloned()
            .collect()
    }

    /// Adapters that may have produced an article with this id
    pub fn for_article_id(&self, article_id: &str) -> Vec<Arc<dyn NewsSource>> {
        let Some(prefix) = Article::id_prefix(article_id) else {
            return Vec::new();
        };
        self.sources
            .iter()
            .filter(|s| s.id_prefix() == prefix)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Arc<dyn NewsSource>] {
        &self.sources
    }

    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.info().id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
