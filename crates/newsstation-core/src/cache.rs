//! Time-based cache of aggregation results
//!
//! One slot per `(category, source)` key. Each slot carries its own async refresh
//! lock so concurrent misses on the same key collapse into a single upstream
//! fetch, while plain readers only take the short synchronous lock around the
//! entry and never wait for a refresh in flight.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::config::AppConfig;
use crate::error::FetchFailureKind;
use crate::news::{Article, Category};
use crate::{Error, Result};

/// Which part of a category a cache entry holds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Source(String),
    /// Merged snapshot across every source of the category
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: Category,
    pub source: SourceKey,
}

impl CacheKey {
    pub fn source(category: Category, source_id: &str) -> Self {
        Self {
            category,
            source: SourceKey::Source(source_id.to_string()),
        }
    }

    pub fn all(category: Category) -> Self {
        Self {
            category,
            source: SourceKey::All,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            SourceKey::Source(id) => write!(f, "{}/{}", self.category, id),
            SourceKey::All => write!(f, "{}/*", self.category),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub articles: Arc<Vec<Article>>,
    pub fetched_at: DateTime<Utc>,
}

/// How a `get_or_refresh` call was answered
#[derive(Debug)]
pub enum CacheOutcome {
    /// Served from a fresh entry, or from a refresh another caller just finished
    Hit,
    /// This call fetched and stored a new entry
    Refreshed,
    /// The refresh failed; the previous entry is served
    Stale(String),
}

#[derive(Debug, Clone)]
struct Failure {
    kind: Option<FetchFailureKind>,
    message: String,
}

impl Failure {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::Fetch { kind, message, .. } => Self {
                kind: Some(*kind),
                message: message.clone(),
            },
            other => Self {
                kind: None,
                message: other.to_string(),
            },
        }
    }

    fn into_error(self, key: &CacheKey) -> Error {
        match (self.kind, &key.source) {
            (Some(kind), SourceKey::Source(id)) => Error::fetch(id, kind, self.message),
            _ => Error::Other(self.message),
        }
    }
}

#[derive(Default)]
struct Slot {
    entry: RwLock<Option<CacheEntry>>,
    refresh: tokio::sync::Mutex<()>,
    /// Bumped every time a refresh attempt completes
    generation: AtomicU64,
    last_failure: RwLock<Option<Failure>>,
    invalidated: AtomicBool,
}

impl Slot {
    fn read(&self) -> Option<CacheEntry> {
        self.entry.read().ok().and_then(|entry| entry.clone())
    }

    fn store(&self, articles: Vec<Article>, fetched_at: DateTime<Utc>) -> bool {
        let Ok(mut entry) = self.entry.write() else {
            return false;
        };
        if entry.as_ref().is_some_and(|e| e.fetched_at > fetched_at) {
            return false;
        }
        *entry = Some(CacheEntry {
            articles: Arc::new(articles),
            fetched_at,
        });
        true
    }

    fn record_attempt(&self, failure: Option<Failure>) {
        if let Ok(mut last) = self.last_failure.write() {
            *last = failure;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn last_failure(&self) -> Option<Failure> {
        self.last_failure.read().ok().and_then(|f| f.clone())
    }
}

pub struct AggregationCache {
    slots: RwLock<HashMap<CacheKey, Arc<Slot>>>,
    expiration: Duration,
}

impl AggregationCache {
    pub fn new(expiration: std::time::Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            expiration: Duration::from_std(expiration).unwrap_or_else(|_| Duration::days(36500)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(std::time::Duration::from_secs(config.cache.expiration_secs))
    }

    fn slot(&self, key: &CacheKey) -> Arc<Slot> {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        match self.slots.write() {
            Ok(mut slots) => slots.entry(key.clone()).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(key.clone()).or_default().clone(),
        }
    }

    fn existing_slot(&self, key: &CacheKey) -> Option<Arc<Slot>> {
        self.slots.read().ok()?.get(key).cloned()
    }

    fn all_slots(&self) -> Vec<(CacheKey, Arc<Slot>)> {
        self.slots
            .read()
            .map(|slots| slots.iter().map(|(k, s)| (k.clone(), s.clone())).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.existing_slot(key)?.read()
    }

    /// Store an entry. Returns false when the slot already holds a newer one.
    pub fn put(&self, key: &CacheKey, articles: Vec<Article>, fetched_at: DateTime<Utc>) -> bool {
        let slot = self.slot(key);
        let stored = slot.store(articles, fetched_at);
        if stored {
            slot.invalidated.store(false, Ordering::SeqCst);
        } else {
            tracing::debug!("Ignoring out-of-date cache write for {}", key);
        }
        stored
    }

    pub fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.fetched_at >= self.expiration
    }

    /// Force the next access to refetch; the current value stays readable
    pub fn invalidate(&self, key: &CacheKey) {
        if let Some(slot) = self.existing_slot(key) {
            slot.invalidated.store(true, Ordering::SeqCst);
        }
    }

    /// Return a fresh entry for `key`, running `fetch` when the entry is missing,
    /// stale, invalidated or `force` is set.
    ///
    /// Only one fetch per key runs at a time. Callers that queued behind it reuse
    /// its outcome instead of fetching again. When the fetch fails the previous
    /// entry is returned as [`CacheOutcome::Stale`]; the error is returned only if
    /// nothing was ever cached for the key.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        key: &CacheKey,
        force: bool,
        fetch: F,
    ) -> Result<(CacheEntry, CacheOutcome)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Article>>>,
    {
        let slot = self.slot(key);
        // Loaded before the freshness check so a refresh finishing in between
        // is seen either as a fresh entry or as a new generation
        let seen_generation = slot.generation.load(Ordering::SeqCst);

        if let Some(entry) = self.fresh_entry(&slot, force) {
            tracing::debug!("Cache hit for {}", key);
            return Ok((entry, CacheOutcome::Hit));
        }

        let _guard = slot.refresh.lock().await;

        if let Some(entry) = self.fresh_entry(&slot, force) {
            tracing::debug!("Cache hit for {} after waiting", key);
            return Ok((entry, CacheOutcome::Hit));
        }

        if slot.generation.load(Ordering::SeqCst) != seen_generation {
            tracing::debug!("Reusing refresh of {} completed while waiting", key);
            return match (slot.read(), slot.last_failure()) {
                (Some(entry), None) => Ok((entry, CacheOutcome::Hit)),
                (Some(entry), Some(failure)) => Ok((entry, CacheOutcome::Stale(failure.message))),
                (None, Some(failure)) => Err(failure.into_error(key)),
                (None, None) => Err(Error::Other(format!("no data cached for {}", key))),
            };
        }

        tracing::debug!("Cache miss for {}, fetching", key);
        match fetch().await {
            Ok(articles) => {
                self.put(key, articles, Utc::now());
                slot.record_attempt(None);
                match slot.read() {
                    Some(entry) => Ok((entry, CacheOutcome::Refreshed)),
                    None => Err(Error::Other(format!("cache slot {} unreadable", key))),
                }
            }
            Err(err) => {
                slot.record_attempt(Some(Failure::from_error(&err)));
                match slot.read() {
                    Some(entry) => {
                        tracing::warn!("Refresh of {} failed, serving stale data: {}", key, err);
                        Ok((entry, CacheOutcome::Stale(err.to_string())))
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn fresh_entry(&self, slot: &Slot, force: bool) -> Option<CacheEntry> {
        if force || slot.invalidated.load(Ordering::SeqCst) {
            return None;
        }
        slot.read().filter(|entry| !self.is_stale(entry, Utc::now()))
    }

    /// Store full content for an article in every entry holding it.
    /// Returns how many entries were updated.
    pub fn backfill_content(&self, article_id: &str, content: &str) -> usize {
        let mut updated = 0;
        for (_, slot) in self.all_slots() {
            let Ok(mut guard) = slot.entry.write() else {
                continue;
            };
            let Some(entry) = guard.as_mut() else {
                continue;
            };
            if !entry.articles.iter().any(|a| a.id == article_id) {
                continue;
            }
            for article in Arc::make_mut(&mut entry.articles)
                .iter_mut()
                .filter(|a| a.id == article_id)
            {
                article.content = Some(content.to_string());
            }
            updated += 1;
        }
        updated
    }

    /// Most recently fetched copy of an article across all entries
    pub fn find_article(&self, article_id: &str) -> Option<Article> {
        self.entries()
            .into_iter()
            .filter_map(|(_, entry)| {
                entry
                    .articles
                    .iter()
                    .find(|a| a.id == article_id)
                    .cloned()
                    .map(|article| (entry.fetched_at, article))
            })
            .max_by_key(|(fetched_at, _)| *fetched_at)
            .map(|(_, article)| article)
    }

    /// Snapshot of every populated entry
    pub fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.all_slots()
            .into_iter()
            .filter_map(|(key, slot)| slot.read().map(|entry| (key, entry)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::SourceInfo;
    use std::sync::atomic::AtomicUsize;

    fn article(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Title {}", id),
            url: format!("https://example.com/{}", id),
            summary: None,
            content: None,
            published_at: Utc::now(),
            source: SourceInfo::new("alpha", "Alpha"),
            author: None,
            image_url: None,
            tags: Vec::new(),
            likes_count: None,
            comments_count: None,
            category: Category::Technology,
        }
    }

    fn cache() -> AggregationCache {
        AggregationCache::new(std::time::Duration::from_secs(1800))
    }

    fn key() -> CacheKey {
        CacheKey::source(Category::Technology, "alpha")
    }

    fn failure() -> Error {
        Error::fetch("alpha", FetchFailureKind::Unreachable, "connection refused")
    }

    #[test]
    fn test_put_and_get() {
        let cache = cache();
        assert!(cache.get(&key()).is_none());

        let now = Utc::now();
        assert!(cache.put(&key(), vec![article("a-1")], now));
        let entry = cache.get(&key()).unwrap();
        assert_eq!(entry.articles.len(), 1);
        assert_eq!(entry.fetched_at, now);
    }

    #[test]
    fn test_put_rejects_older_entry() {
        let cache = cache();
        let now = Utc::now();
        assert!(cache.put(&key(), vec![article("a-2")], now));
        assert!(!cache.put(&key(), vec![article("a-1")], now - Duration::seconds(5)));
        assert_eq!(cache.get(&key()).unwrap().articles[0].id, "a-2");
    }

    #[test]
    fn test_staleness_boundary() {
        let cache = cache();
        let fetched_at = Utc::now();
        let entry = CacheEntry {
            articles: Arc::new(Vec::new()),
            fetched_at,
        };
        assert!(!cache.is_stale(&entry, fetched_at + Duration::seconds(1799)));
        assert!(cache.is_stale(&entry, fetched_at + Duration::seconds(1800)));
        assert!(cache.is_stale(&entry, fetched_at + Duration::seconds(4000)));
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_fetch() {
        let cache = cache();
        cache.put(&key(), vec![article("a-1")], Utc::now());

        let (entry, outcome) = cache
            .get_or_refresh(&key(), false, || async { Err(Error::Other("must not fetch".into())) })
            .await
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::Hit));
        assert_eq!(entry.articles.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let cache = cache();
        cache.put(&key(), vec![article("a-1")], Utc::now() - Duration::seconds(1800));

        let (entry, outcome) = cache
            .get_or_refresh(&key(), false, || async { Ok(vec![article("a-2"), article("a-3")]) })
            .await
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::Refreshed));
        assert_eq!(entry.articles.len(), 2);
    }

    #[tokio::test]
    async fn test_force_bypasses_fresh_entry() {
        let cache = cache();
        cache.put(&key(), vec![article("a-1")], Utc::now());

        let (entry, outcome) = cache
            .get_or_refresh(&key(), true, || async { Ok(vec![article("a-9")]) })
            .await
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::Refreshed));
        assert_eq!(entry.articles[0].id, "a-9");
    }

    #[tokio::test]
    async fn test_invalidate_keeps_value_readable() {
        let cache = cache();
        cache.put(&key(), vec![article("a-1")], Utc::now());
        cache.invalidate(&key());

        assert_eq!(cache.get(&key()).unwrap().articles[0].id, "a-1");

        let (_, outcome) = cache
            .get_or_refresh(&key(), false, || async { Ok(vec![article("a-2")]) })
            .await
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::Refreshed));

        let (entry, outcome) = cache
            .get_or_refresh(&key(), false, || async { Err(Error::Other("must not fetch".into())) })
            .await
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::Hit));
        assert_eq!(entry.articles[0].id, "a-2");
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_previous_entry() {
        let cache = cache();
        cache.put(&key(), vec![article("a-1")], Utc::now() - Duration::hours(2));

        let (entry, outcome) = cache
            .get_or_refresh(&key(), false, || async { Err(failure()) })
            .await
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::Stale(_)));
        assert_eq!(entry.articles[0].id, "a-1");
    }

    #[tokio::test]
    async fn test_failed_refresh_without_entry_errors() {
        let cache = cache();
        let result = cache
            .get_or_refresh(&key(), false, || async { Err(failure()) })
            .await;
        assert!(matches!(
            result,
            Err(Error::Fetch { kind: FetchFailureKind::Unreachable, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache = cache();
        let counter = AtomicUsize::new(0);
        let fetches = &counter;

        let fetch = move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(vec![article("a-1")])
        };

        let key = key();
        let (first, second) = tokio::join!(
            cache.get_or_refresh(&key, false, fetch),
            cache.get_or_refresh(&key, false, fetch),
        );

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap().0.articles.len(), 1);
        assert_eq!(second.unwrap().0.articles.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_fetch_once() {
        let cache = cache();
        let counter = AtomicUsize::new(0);
        let fetches = &counter;

        let fetch = move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Err::<Vec<Article>, _>(failure())
        };

        let key = key();
        let (first, second) = tokio::join!(
            cache.get_or_refresh(&key, false, fetch),
            cache.get_or_refresh(&key, false, fetch),
        );

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(matches!(first, Err(Error::Fetch { .. })));
        assert!(matches!(second, Err(Error::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_entry_stored_while_waiting_is_not_refetched() {
        let cache = cache();
        let key = key();
        let slot = cache.slot(&key);
        let guard = slot.refresh.lock().await;

        let waiter = cache.get_or_refresh(&key, false, || async {
            Err(Error::Other("must not fetch".into()))
        });
        let writer = async {
            tokio::task::yield_now().await;
            cache.put(&key, vec![article("a-1")], Utc::now());
            drop(guard);
        };

        let (result, ()) = tokio::join!(waiter, writer);
        let (entry, outcome) = result.unwrap();
        assert!(matches!(outcome, CacheOutcome::Hit));
        assert_eq!(entry.articles[0].id, "a-1");
    }

    #[test]
    fn test_backfill_and_find() {
        let cache = cache();
        let now = Utc::now();
        cache.put(&key(), vec![article("a-1"), article("a-2")], now);
        cache.put(&CacheKey::all(Category::Technology), vec![article("a-1")], now);

        assert_eq!(cache.backfill_content("a-1", "full text"), 2);
        assert_eq!(cache.backfill_content("missing", "x"), 0);

        let found = cache.find_article("a-1").unwrap();
        assert_eq!(found.content.as_deref(), Some("full text"));
        assert!(cache.find_article("a-2").unwrap().content.is_none());
        assert!(cache.find_article("zzz").is_none());
        assert_eq!(cache.entries().len(), 2);
    }
}
