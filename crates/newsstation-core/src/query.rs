//! Read-side operations over aggregated articles: pagination, lookup, content,
//! trending and search.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::aggregator::{Aggregation, Aggregator};
use crate::config::{AppConfig, TrendingConfig};
use crate::news::{Article, Category, CategorySummary, NewsFeed, SortOrder};
use crate::{Error, Result};

/// Trending score: weighted engagement halved every `half_life_hours` of age
pub fn trending_score(article: &Article, now: DateTime<Utc>, weights: &TrendingConfig) -> f64 {
    let likes = article.likes_count.unwrap_or(0) as f64;
    let comments = article.comments_count.unwrap_or(0) as f64;
    let engagement = weights.likes_weight * likes + weights.comments_weight * comments + 1.0;

    let age_hours = (now - article.published_at).num_seconds().max(0) as f64 / 3600.0;
    engagement * 0.5f64.powf(age_hours / weights.half_life_hours)
}

/// Relevance of an article to a lowercased query; 0 means no match
fn relevance(article: &Article, phrase: &str, tokens: &[&str]) -> u32 {
    let title = article.title.to_lowercase();
    let summary = article.summary.as_deref().unwrap_or_default().to_lowercase();

    let mut score = 0;
    if title.contains(phrase) {
        score += 3;
    }
    if summary.contains(phrase) {
        score += 1;
    }
    for token in tokens {
        if title.contains(token) {
            score += 2;
        }
        if summary.contains(token) {
            score += 1;
        }
    }
    score
}

fn newest_first(a: &Article, b: &Article) -> Ordering {
    b.published_at.cmp(&a.published_at)
}

#[derive(Clone)]
pub struct QueryService {
    aggregator: Aggregator,
    default_page_size: u32,
    max_page_size: u32,
    trending_limit: usize,
    trending: TrendingConfig,
}

impl QueryService {
    pub fn new(config: &AppConfig, aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            default_page_size: config.feed.default_page_size,
            max_page_size: config.feed.max_page_size,
            trending_limit: config.feed.trending_limit,
            trending: config.trending.clone(),
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Resolve a requested limit: negative is rejected, zero becomes 1,
    /// anything above the maximum is clamped to it
    fn resolve_limit(&self, limit: Option<i64>, default: u32) -> Result<u32> {
        match limit {
            None => Ok(default.min(self.max_page_size)),
            Some(n) if n < 0 => Err(Error::Validation(format!(
                "limit must not be negative (got {})",
                n
            ))),
            Some(n) => Ok(n.clamp(1, self.max_page_size as i64) as u32),
        }
    }

    fn resolve_page(page: Option<i64>) -> Result<u32> {
        match page {
            None => Ok(1),
            Some(n) if n < 0 => Err(Error::Validation(format!(
                "page must not be negative (got {})",
                n
            ))),
            Some(n) => Ok(n.clamp(1, u32::MAX as i64) as u32),
        }
    }

    fn sort(&self, articles: &mut [Article], order: SortOrder) {
        match order {
            SortOrder::Newest => articles.sort_by(newest_first),
            SortOrder::Oldest => articles.sort_by(|a, b| a.published_at.cmp(&b.published_at)),
            SortOrder::Popular => self.rank_trending(articles, Utc::now()),
            SortOrder::Source => {}
        }
    }

    fn rank_trending(&self, articles: &mut [Article], now: DateTime<Utc>) {
        let mut scored: Vec<(f64, Article)> = articles
            .iter()
            .map(|a| (trending_score(a, now, &self.trending), a.clone()))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| newest_first(a, b))
                .then_with(|| a.id.cmp(&b.id))
        });
        for (slot, (_, article)) in articles.iter_mut().zip(scored) {
            *slot = article;
        }
    }

    fn notice_for(aggregation: &Aggregation, sources_registered: bool) -> Option<String> {
        if !aggregation.articles.is_empty() {
            return None;
        }
        let category = aggregation.category;
        if !sources_registered {
            return Some(format!("No sources are configured for category '{}'", category));
        }
        if !aggregation.failures.is_empty() {
            return Some(format!(
                "All sources for '{}' are unavailable and nothing is cached yet: {}",
                category,
                aggregation.failed_source_ids().join(", ")
            ));
        }
        Some(format!("No articles available for '{}'", category))
    }

    /// One page of a category.
    ///
    /// Pages are 1-indexed; page 0 is treated as 1 and the limit is clamped to the
    /// configured maximum. A page past the end is empty, not an error.
    pub async fn list_articles(
        &self,
        category: Category,
        page: Option<i64>,
        limit: Option<i64>,
        refresh: bool,
        sort: SortOrder,
    ) -> Result<NewsFeed> {
        let page = Self::resolve_page(page)?;
        let limit = self.resolve_limit(limit, self.default_page_size)?;

        let aggregation = self.aggregator.get_articles(category, refresh).await;
        let has_sources = !self.aggregator.registry().for_category(category).is_empty();
        let notice = Self::notice_for(&aggregation, has_sources);

        let mut articles = aggregation.articles.clone();
        self.sort(&mut articles, sort);

        let total = articles.len();
        let offset = (page as usize - 1).saturating_mul(limit as usize);
        let page_articles = articles.into_iter().skip(offset).take(limit as usize).collect();

        Ok(NewsFeed {
            category,
            page,
            limit,
            total,
            articles: page_articles,
            last_updated: aggregation.fetched_at,
            failed_sources: aggregation.failed_source_ids(),
            notice,
        })
    }

    /// Look an article up by id, populating the owning sources' cache if needed
    pub async fn get_article(&self, article_id: &str) -> Result<Article> {
        if let Some(article) = self.aggregator.cache().find_article(article_id) {
            return Ok(article);
        }

        let candidates = self.aggregator.registry().for_article_id(article_id);
        for source in candidates {
            let source_id = source.info().id.clone();
            let aggregation = self
                .aggregator
                .get_source_articles(&source_id, Category::Realtime, false)
                .await?;
            if let Some(article) = aggregation.articles.into_iter().find(|a| a.id == article_id) {
                return Ok(article);
            }
        }

        Err(Error::NotFound(format!("article '{}'", article_id)))
    }

    /// Full text of an article, fetched from its source on first request.
    ///
    /// Unknown ids are `NotFound`; a source that fails or has nothing to offer
    /// is `ContentUnavailable`. The summary is never substituted.
    pub async fn get_article_content(&self, article_id: &str) -> Result<String> {
        let article = self.get_article(article_id).await?;
        if let Some(content) = article.content.as_deref().filter(|_| article.has_content()) {
            return Ok(content.to_string());
        }

        let source = self
            .aggregator
            .registry()
            .get(&article.source.id)
            .ok_or_else(|| {
                Error::ContentUnavailable(format!(
                    "source '{}' of article '{}' is no longer configured",
                    article.source.id, article_id
                ))
            })?;

        let content = match self.aggregator.fetch_content(source.as_ref(), &article).await {
            Ok(Some(content)) if !content.trim().is_empty() => content,
            Ok(_) => {
                return Err(Error::ContentUnavailable(format!(
                    "no content available for article '{}'",
                    article_id
                )))
            }
            Err(e) => {
                tracing::warn!("Content fetch for {} failed: {}", article_id, e);
                return Err(Error::ContentUnavailable(format!(
                    "content of article '{}' could not be fetched: {}",
                    article_id, e
                )));
            }
        };

        let updated = self.aggregator.cache().backfill_content(article_id, &content);
        tracing::debug!("Backfilled content of {} into {} cache entries", article_id, updated);
        self.aggregator.archive_content(article_id, &content).await;

        Ok(content)
    }

    /// Article count and last fetch time for every category
    pub async fn get_categories(&self) -> Vec<CategorySummary> {
        let mut summaries = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let aggregation = self.aggregator.get_articles(category, false).await;
            summaries.push(CategorySummary {
                category,
                article_count: aggregation.articles.len(),
                last_updated: aggregation.fetched_at,
            });
        }
        summaries
    }

    /// Highest trending scores across every source
    pub async fn get_trending(&self, limit: Option<i64>) -> Result<Vec<Article>> {
        let limit = self.resolve_limit(limit, self.trending_limit as u32)?;
        let aggregation = self.aggregator.get_articles(Category::Realtime, false).await;

        let mut articles = aggregation.articles;
        self.rank_trending(&mut articles, Utc::now());
        articles.truncate(limit as usize);
        Ok(articles)
    }

    /// Case-insensitive phrase and token search over titles and summaries,
    /// ranked by relevance then recency
    pub async fn search(
        &self,
        query: &str,
        category: Option<Category>,
        source_id: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Article>> {
        let phrase = query.trim().to_lowercase();
        if phrase.is_empty() {
            return Err(Error::Validation("search query must not be empty".to_string()));
        }
        let limit = self.resolve_limit(limit, self.default_page_size)?;

        let mut seen = HashSet::new();
        let tokens: Vec<&str> = phrase
            .split_whitespace()
            .filter(|token| seen.insert(*token))
            .collect();

        let aggregation = self
            .aggregator
            .get_articles(category.unwrap_or(Category::Realtime), false)
            .await;

        let mut matches: Vec<(u32, Article)> = aggregation
            .articles
            .into_iter()
            .filter(|a| source_id.map_or(true, |id| a.source.id == id))
            .filter_map(|a| {
                let score = relevance(&a, &phrase, &tokens);
                (score > 0).then_some((score, a))
            })
            .collect();

        matches.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| newest_first(a, b)));
        Ok(matches
            .into_iter()
            .take(limit as usize)
            .map(|(_, article)| article)
            .collect())
    }

    /// Articles of a single source. A source that does not publish into the
    /// category yields an empty list.
    pub async fn get_source_news(
        &self,
        source_id: &str,
        category: Category,
        limit: Option<i64>,
        refresh: bool,
    ) -> Result<Vec<Article>> {
        let limit = self.resolve_limit(limit, self.default_page_size)?;
        let aggregation = self
            .aggregator
            .get_source_articles(source_id, category, refresh)
            .await?;

        let mut articles = aggregation.articles;
        articles.truncate(limit as usize);
        Ok(articles)
    }
}
