use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topical partition of articles; also the partition key of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Union of every registered source
    Realtime,
    Technology,
    World,
    Business,
    Entertainment,
    Sports,
    Science,
    Health,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Realtime,
        Category::Technology,
        Category::World,
        Category::Business,
        Category::Entertainment,
        Category::Sports,
        Category::Science,
        Category::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Realtime => "realtime",
            Category::Technology => "technology",
            Category::World => "world",
            Category::Business => "business",
            Category::Entertainment => "entertainment",
            Category::Sports => "sports",
            Category::Science => "science",
            Category::Health => "health",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| crate::Error::NotFound(format!("category '{}'", wanted)))
    }
}

/// A news source as exposed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
}

impl SourceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A normalized news item produced by a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    /// Full text, filled in on demand; not part of the list payload
    #[serde(skip_serializing, default)]
    pub content: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source: SourceInfo,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub likes_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub comments_count: Option<u32>,
    pub category: Category,
}

impl Article {
    /// Source id prefix of an article id (`hn-123` -> `hn`)
    pub fn id_prefix(id: &str) -> Option<&str> {
        id.split_once('-').map(|(prefix, _)| prefix).filter(|p| !p.is_empty())
    }

    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Requested ordering of a news listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest first
    #[default]
    Newest,
    Oldest,
    /// Highest trending score first
    Popular,
    /// Aggregation order: grouped by source, in registry order
    Source,
}

impl FromStr for SortOrder {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" | "latest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "popular" | "trending" => Ok(SortOrder::Popular),
            "source" => Ok(SortOrder::Source),
            other => Err(crate::Error::Validation(format!(
                "unknown sort '{}', expected newest, oldest, popular or source",
                other
            ))),
        }
    }
}

/// One page of a category listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsFeed {
    pub category: Category,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub articles: Vec<Article>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Sources that failed during this request and were served stale or omitted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_sources: Vec<String>,
    /// Why the listing is empty, when no data exists at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: Category,
    pub article_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Article {
        Article {
            id: "hn-42".to_string(),
            title: "Rust 2.0".to_string(),
            url: "https://example.com/rust".to_string(),
            summary: None,
            content: Some("body".to_string()),
            published_at: DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            source: SourceInfo::new("hacker_news", "Hacker News"),
            author: None,
            image_url: None,
            tags: vec!["hacker-news".to_string()],
            likes_count: Some(10),
            comments_count: None,
            category: Category::Technology,
        }
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Technology".parse::<Category>().unwrap(), Category::Technology);
        assert_eq!(" world ".parse::<Category>().unwrap(), Category::World);
        assert!(matches!("gossip".parse::<Category>(), Err(crate::Error::NotFound(_))));
    }

    #[test]
    fn test_article_json_shape() {
        let json = serde_json::to_value(article()).unwrap();
        assert_eq!(json["published_at"], "2025-01-02T03:04:05Z");
        assert_eq!(json["source"]["id"], "hacker_news");
        assert_eq!(json["source"]["name"], "Hacker News");
        assert_eq!(json["category"], "technology");
        assert_eq!(json["likes_count"], 10);
        assert!(json.get("comments_count").is_none());
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_id_prefix() {
        assert_eq!(Article::id_prefix("hn-42"), Some("hn"));
        assert_eq!(Article::id_prefix("reddit-abc-def"), Some("reddit"));
        assert_eq!(Article::id_prefix("nodash"), None);
        assert_eq!(Article::id_prefix("-x"), None);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("Popular".parse::<SortOrder>().unwrap(), SortOrder::Popular);
        assert!(matches!("random".parse::<SortOrder>(), Err(crate::Error::Validation(_))));
    }
}
