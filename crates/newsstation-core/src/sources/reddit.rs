use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::http::HttpFetcher;
use super::NewsSource;
use crate::error::FetchFailureKind;
use crate::news::{Article, Category, SourceInfo};
use crate::{Error, Result};

const ID_PREFIX: &str = "reddit";
const REDDIT_BASE: &str = "https://www.reddit.com";
const MIN_SELFTEXT_LEN: usize = 100;
const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    is_self: bool,
    #[serde(default)]
    author: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u32,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    preview: Option<Preview>,
}

#[derive(Debug, Deserialize)]
struct Preview {
    #[serde(default)]
    images: Vec<PreviewImage>,
}

#[derive(Debug, Deserialize)]
struct PreviewImage {
    source: PreviewSource,
}

#[derive(Debug, Deserialize)]
struct PreviewSource {
    url: String,
}

/// Category a subreddit publishes into; `Realtime` when it fits none
fn subreddit_category(subreddit: &str) -> Category {
    match subreddit.to_ascii_lowercase().as_str() {
        "worldnews" | "politics" => Category::World,
        "technology" => Category::Technology,
        "science" => Category::Science,
        "business" => Category::Business,
        _ => Category::Realtime,
    }
}

/// Top posts of the day from one subreddit
pub struct RedditSource {
    http: HttpFetcher,
    subreddit: String,
    category: Category,
    categories: Vec<Category>,
    info: SourceInfo,
}

impl RedditSource {
    pub fn new(http: HttpFetcher, subreddit: &str) -> Self {
        let subreddit = subreddit.trim().trim_start_matches("r/").to_string();
        let category = subreddit_category(&subreddit);
        let categories = if category == Category::Realtime {
            Vec::new()
        } else {
            vec![category]
        };

        Self {
            http,
            info: SourceInfo::new(
                format!("reddit_{}", subreddit.to_lowercase()),
                format!("Reddit r/{}", subreddit),
            ),
            subreddit,
            category,
            categories,
        }
    }

    fn listing_url(&self, limit: usize) -> String {
        format!("{}/r/{}/top.json?limit={}&t=day", REDDIT_BASE, self.subreddit, limit)
    }
}

fn image_url(post: &Post) -> Option<String> {
    if let Some(thumb) = post.thumbnail.as_deref().filter(|t| t.starts_with("http")) {
        return Some(thumb.to_string());
    }
    post.preview
        .as_ref()?
        .images
        .first()
        .map(|image| image.source.url.replace("&amp;", "&"))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", text[..end].trim_end()),
        None => text.to_string(),
    }
}

/// Map one listing child to an article, `None` for posts that carry nothing to read
fn post_to_article(
    raw: serde_json::Value,
    subreddit: &str,
    category: Category,
    info: &SourceInfo,
) -> Option<Article> {
    let data = raw.get("data").cloned().unwrap_or(raw);
    let post: Post = match serde_json::from_value(data) {
        Ok(post) => post,
        Err(e) => {
            tracing::debug!("Skipping malformed Reddit post in r/{}: {}", subreddit, e);
            return None;
        }
    };

    let selftext = post.selftext.trim();
    if post.is_self && selftext.chars().count() < MIN_SELFTEXT_LEN {
        return None;
    }

    let link = post.url.as_deref().map(str::trim).filter(|u| !u.is_empty());
    if link.is_none() && selftext.is_empty() {
        return None;
    }

    let permalink = post
        .permalink
        .as_deref()
        .map(|p| format!("{}{}", REDDIT_BASE, p));
    let url = if post.is_self {
        permalink.or_else(|| link.map(str::to_string))?
    } else {
        link.map(str::to_string).or(permalink)?
    };

    let (summary, content) = if selftext.is_empty() {
        (None, None)
    } else {
        (
            Some(truncate_chars(selftext, SUMMARY_CHARS)),
            Some(selftext.to_string()),
        )
    };

    let published_at = DateTime::<Utc>::from_timestamp(post.created_utc as i64, 0)?;

    Some(Article {
        id: format!("{}-{}", ID_PREFIX, post.id),
        title: post.title.clone(),
        url,
        summary,
        content,
        published_at,
        source: info.clone(),
        author: post.author.clone(),
        image_url: image_url(&post),
        tags: vec![ID_PREFIX.to_string(), format!("r/{}", subreddit)],
        likes_count: Some(post.score.max(0) as u32),
        comments_count: Some(post.num_comments),
        category,
    })
}

/// Text of a Reddit post from its `.json` endpoint
fn selftext_from_thread(thread: &serde_json::Value) -> Option<String> {
    thread
        .get(0)?
        .pointer("/data/children/0/data/selftext")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_reddit_url(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "reddit.com" || h.ends_with(".reddit.com")))
        .unwrap_or(false)
}

#[async_trait]
impl NewsSource for RedditSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn id_prefix(&self) -> &str {
        ID_PREFIX
    }

    fn categories(&self) -> &[Category] {
        &self.categories
    }

    async fn fetch_articles(&self, _category: Category, limit: usize) -> Result<Vec<Article>> {
        let listing: Listing = self.http.get_json(&self.info.id, &self.listing_url(limit)).await?;

        if listing.data.children.is_empty() {
            return Err(Error::fetch(
                &self.info.id,
                FetchFailureKind::Empty,
                format!("r/{} returned no posts", self.subreddit),
            ));
        }

        let articles: Vec<Article> = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| post_to_article(child, &self.subreddit, self.category, &self.info))
            .take(limit)
            .collect();

        tracing::info!("Fetched {} articles from r/{}", articles.len(), self.subreddit);
        Ok(articles)
    }

    async fn fetch_content(&self, article: &Article) -> Result<Option<String>> {
        if article.has_content() {
            return Ok(article.content.clone());
        }

        if is_reddit_url(&article.url) {
            let json_url = format!("{}.json", article.url.trim_end_matches('/'));
            let thread: serde_json::Value = self.http.get_json(&self.info.id, &json_url).await?;
            return match selftext_from_thread(&thread) {
                Some(text) => Ok(Some(text)),
                None => Err(Error::fetch(
                    &self.info.id,
                    FetchFailureKind::Empty,
                    format!("no text in {}", article.url),
                )),
            };
        }

        self.http.get_page_text(&self.info.id, &article.url).await
    }
}
