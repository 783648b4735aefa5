//! In-memory source used by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::NewsSource;
use crate::error::FetchFailureKind;
use crate::news::{Article, Category, SourceInfo};
use crate::{Error, Result};

pub struct MockSource {
    info: SourceInfo,
    prefix: String,
    categories: Vec<Category>,
    articles: Mutex<Vec<Article>>,
    contents: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
    content_fetches: AtomicUsize,
}

impl MockSource {
    pub fn new(id: &str, prefix: &str, category: Category) -> Self {
        let categories = if category == Category::Realtime {
            Vec::new()
        } else {
            vec![category]
        };
        Self {
            info: SourceInfo::new(id, format!("Mock {}", id)),
            prefix: prefix.to_string(),
            categories,
            articles: Mutex::new(Vec::new()),
            contents: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            content_fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_articles(self, articles: Vec<Article>) -> Self {
        self.set_articles(articles);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn with_content(self, article_id: &str, content: &str) -> Self {
        self.contents
            .lock()
            .unwrap()
            .insert(article_id.to_string(), content.to_string());
        self
    }

    pub fn set_articles(&self, articles: Vec<Article>) {
        *self.articles.lock().unwrap() = articles;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn content_fetch_count(&self) -> usize {
        self.content_fetches.load(Ordering::SeqCst)
    }

    /// Article owned by this source with id `{prefix}-{n}`
    pub fn article(&self, n: u32, title: &str, published_at: DateTime<Utc>) -> Article {
        Article {
            id: format!("{}-{}", self.prefix, n),
            title: title.to_string(),
            url: format!("https://{}.example.com/{}", self.info.id, n),
            summary: None,
            content: None,
            published_at,
            source: self.info.clone(),
            author: None,
            image_url: None,
            tags: Vec::new(),
            likes_count: None,
            comments_count: None,
            category: self.categories.first().copied().unwrap_or(Category::Realtime),
        }
    }
}

#[async_trait]
impl NewsSource for MockSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn id_prefix(&self) -> &str {
        &self.prefix
    }

    fn categories(&self) -> &[Category] {
        &self.categories
    }

    async fn fetch_articles(&self, _category: Category, limit: usize) -> Result<Vec<Article>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::fetch(
                &self.info.id,
                FetchFailureKind::Unreachable,
                "mock failure",
            ));
        }

        let mut articles = self.articles.lock().unwrap().clone();
        articles.truncate(limit);
        Ok(articles)
    }

    async fn fetch_content(&self, article: &Article) -> Result<Option<String>> {
        self.content_fetches.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::fetch(
                &self.info.id,
                FetchFailureKind::Unreachable,
                "mock failure",
            ));
        }

        Ok(self.contents.lock().unwrap().get(&article.id).cloned())
    }
}
