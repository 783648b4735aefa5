use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::task::JoinSet;

use super::http::HttpFetcher;
use super::NewsSource;
use crate::error::FetchFailureKind;
use crate::news::{Article, Category, SourceInfo};
use crate::{Error, Result};

const SOURCE_ID: &str = "hacker_news";
const ID_PREFIX: &str = "hn";
const MAX_CONCURRENT_ITEM_REQUESTS: usize = 8;

/// Item as returned by the Firebase API (`/item/{id}.json`)
#[derive(Debug, Deserialize)]
struct HnItem {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    descendants: Option<u32>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

/// Top stories from the Hacker News Firebase API
pub struct HackerNewsSource {
    http: HttpFetcher,
    api_url: String,
    info: SourceInfo,
}

impl HackerNewsSource {
    pub fn new(http: HttpFetcher, api_url: &str) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            info: SourceInfo::new(SOURCE_ID, "Hacker News"),
        }
    }

    async fn fetch_items(&self, ids: Vec<u64>) -> Vec<(usize, serde_json::Value)> {
        let http = self.http.clone();
        let api_url = self.api_url.clone();
        fetch_ranked(ids, MAX_CONCURRENT_ITEM_REQUESTS, move |id| {
            let http = http.clone();
            let url = format!("{}/item/{}.json", api_url, id);
            async move { http.get_json::<serde_json::Value>(SOURCE_ID, &url).await }
        })
        .await
    }
}

/// Run `fetch` for every id with at most `max_in_flight` requests outstanding.
/// Successful results come back in the order of `ids`; failures are skipped.
async fn fetch_ranked<T, F, Fut>(ids: Vec<u64>, max_in_flight: usize, fetch: F) -> Vec<(usize, T)>
where
    T: Send + 'static,
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let max_in_flight = max_in_flight.max(1);
    let mut join_set = JoinSet::new();
    let mut items = Vec::new();

    for (rank, id) in ids.into_iter().enumerate() {
        while join_set.len() >= max_in_flight {
            if let Some(joined) = join_set.join_next().await {
                collect_item(joined, &mut items);
            }
        }
        let request = fetch(id);
        join_set.spawn(async move { (rank, request.await) });
    }

    while let Some(joined) = join_set.join_next().await {
        collect_item(joined, &mut items);
    }
    items.sort_by_key(|(rank, _)| *rank);
    items
}

fn collect_item<T>(
    joined: std::result::Result<(usize, Result<T>), tokio::task::JoinError>,
    items: &mut Vec<(usize, T)>,
) {
    match joined {
        Ok((rank, Ok(value))) => items.push((rank, value)),
        Ok((rank, Err(e))) => tracing::debug!("Skipping story at rank {}: {}", rank + 1, e),
        Err(e) => tracing::warn!("Story fetch task failed: {}", e),
    }
}

/// Map one raw item to an article, `None` for anything that is not a linkable story
fn story_to_article(raw: serde_json::Value, info: &SourceInfo) -> Option<Article> {
    let item: HnItem = match serde_json::from_value(raw) {
        Ok(item) => item,
        Err(e) => {
            tracing::debug!("Skipping malformed Hacker News item: {}", e);
            return None;
        }
    };

    if item.dead || item.deleted {
        return None;
    }

    let url = item.url.filter(|u| !u.trim().is_empty())?;
    let title = item.title.filter(|t| !t.trim().is_empty())?;
    let published_at = DateTime::<Utc>::from_timestamp(item.time?, 0)?;

    Some(Article {
        id: format!("{}-{}", ID_PREFIX, item.id),
        title,
        url,
        summary: None,
        content: None,
        published_at,
        source: info.clone(),
        author: item.by,
        image_url: None,
        tags: vec!["hacker-news".to_string()],
        likes_count: Some(item.score.unwrap_or(0)),
        comments_count: Some(item.descendants.unwrap_or(0)),
        category: Category::Technology,
    })
}

#[async_trait]
impl NewsSource for HackerNewsSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn id_prefix(&self) -> &str {
        ID_PREFIX
    }

    fn categories(&self) -> &[Category] {
        &[Category::Technology]
    }

    async fn fetch_articles(&self, _category: Category, limit: usize) -> Result<Vec<Article>> {
        let url = format!("{}/topstories.json", self.api_url);
        let mut ids: Vec<u64> = self.http.get_json(SOURCE_ID, &url).await?;

        if ids.is_empty() {
            return Err(Error::fetch(SOURCE_ID, FetchFailureKind::Empty, "no top stories"));
        }
        ids.truncate(limit);
        let requested = ids.len();

        let items = self.fetch_items(ids).await;
        if items.is_empty() {
            return Err(Error::fetch(
                SOURCE_ID,
                FetchFailureKind::Unreachable,
                format!("none of {} story requests succeeded", requested),
            ));
        }

        let articles: Vec<Article> = items
            .into_iter()
            .filter_map(|(_, raw)| story_to_article(raw, &self.info))
            .collect();

        tracing::info!("Fetched {} articles from Hacker News", articles.len());
        Ok(articles)
    }

    async fn fetch_content(&self, article: &Article) -> Result<Option<String>> {
        self.http.get_page_text(SOURCE_ID, &article.url).await
    }
}
