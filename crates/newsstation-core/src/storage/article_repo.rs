use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use super::retry::with_retry;
use super::Database;
use crate::news::{Article, Category, SourceInfo};
use crate::Result;

/// One archived source snapshot, as reloaded into the cache on startup
#[derive(Debug, Clone)]
pub struct ArchivedSnapshot {
    pub category: Category,
    pub source_id: String,
    pub articles: Vec<Article>,
    pub fetched_at: DateTime<Utc>,
}

/// Repository for the article archive
pub struct ArticleRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct ArticleRow {
    category: String,
    id: String,
    source_id: String,
    source_name: String,
    title: String,
    url: String,
    summary: Option<String>,
    content: Option<String>,
    author: Option<String>,
    image_url: Option<String>,
    tags: String,
    likes_count: Option<i64>,
    comments_count: Option<i64>,
    article_category: String,
    published_at: DateTime<Utc>,
    fetched_at: DateTime<Utc>,
}

impl ArticleRow {
    fn into_article(self) -> Option<(Category, DateTime<Utc>, Article)> {
        let category = self.category.parse().ok()?;
        let article_category = self.article_category.parse().ok()?;
        let article = Article {
            id: self.id,
            title: self.title,
            url: self.url,
            summary: self.summary,
            content: self.content,
            published_at: self.published_at,
            source: SourceInfo::new(self.source_id, self.source_name),
            author: self.author,
            image_url: self.image_url,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            likes_count: self.likes_count.and_then(|n| u32::try_from(n).ok()),
            comments_count: self.comments_count.and_then(|n| u32::try_from(n).ok()),
            category: article_category,
        };
        Some((category, self.fetched_at, article))
    }
}

impl<'a> ArticleRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Archive one source's articles for a category, replacing earlier copies
    pub async fn upsert_many(
        &self,
        category: Category,
        articles: &[Article],
        fetched_at: DateTime<Utc>,
    ) -> Result<u32> {
        if articles.is_empty() {
            return Ok(0);
        }

        let pool = self.db.pool().clone();
        let category = category.as_str();

        let written = with_retry(|| {
            let pool = pool.clone();
            async move {
                let mut tx = pool.begin().await?;
                let mut written = 0u32;

                for (position, article) in articles.iter().enumerate() {
                    let tags = serde_json::to_string(&article.tags).unwrap_or_else(|_| "[]".into());
                    sqlx::query(
                        r#"
                        INSERT INTO articles
                        (category, id, source_id, source_name, position, title, url, summary,
                         content, author, image_url, tags, likes_count, comments_count,
                         article_category, published_at, fetched_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(category, id) DO UPDATE SET
                            source_id = excluded.source_id,
                            source_name = excluded.source_name,
                            position = excluded.position,
                            title = excluded.title,
                            url = excluded.url,
                            summary = excluded.summary,
                            content = COALESCE(excluded.content, articles.content),
                            author = excluded.author,
                            image_url = excluded.image_url,
                            tags = excluded.tags,
                            likes_count = excluded.likes_count,
                            comments_count = excluded.comments_count,
                            article_category = excluded.article_category,
                            published_at = excluded.published_at,
                            fetched_at = excluded.fetched_at
                        WHERE excluded.fetched_at >= articles.fetched_at
                        "#,
                    )
                    .bind(category)
                    .bind(&article.id)
                    .bind(&article.source.id)
                    .bind(&article.source.name)
                    .bind(position as i64)
                    .bind(&article.title)
                    .bind(&article.url)
                    .bind(&article.summary)
                    .bind(&article.content)
                    .bind(&article.author)
                    .bind(&article.image_url)
                    .bind(tags)
                    .bind(article.likes_count.map(i64::from))
                    .bind(article.comments_count.map(i64::from))
                    .bind(article.category.as_str())
                    .bind(article.published_at)
                    .bind(fetched_at)
                    .execute(&mut *tx)
                    .await?;
                    written += 1;
                }

                tx.commit().await?;
                Ok::<_, sqlx::Error>(written)
            }
        })
        .await?;

        Ok(written)
    }

    /// Store fetched content for an article in every category it is archived under
    pub async fn update_content(&self, article_id: &str, content: &str) -> Result<u64> {
        let pool = self.db.pool().clone();

        let updated = with_retry(|| {
            let pool = pool.clone();
            async move {
                sqlx::query("UPDATE articles SET content = ? WHERE id = ?")
                    .bind(content)
                    .bind(article_id)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
            }
        })
        .await?;

        Ok(updated)
    }

    /// Latest snapshot of every (category, source) fetched within the retention window
    pub async fn load_cached(&self, retention_days: u32) -> Result<Vec<ArchivedSnapshot>> {
        let pool = self.db.pool().clone();
        let cutoff = Utc::now() - Duration::days(retention_days as i64);

        let rows: Vec<ArticleRow> = with_retry(|| {
            let pool = pool.clone();
            async move {
                sqlx::query_as(
                    r#"
                    SELECT category, id, source_id, source_name, title, url, summary, content,
                           author, image_url, tags, likes_count, comments_count,
                           article_category, published_at, fetched_at
                    FROM articles
                    WHERE fetched_at >= ?
                    ORDER BY category, source_id, position
                    "#,
                )
                .bind(cutoff)
                .fetch_all(&pool)
                .await
            }
        })
        .await?;

        let mut grouped: BTreeMap<(Category, String), Vec<(DateTime<Utc>, Article)>> =
            BTreeMap::new();
        for row in rows {
            let Some((category, fetched_at, article)) = row.into_article() else {
                continue;
            };
            grouped
                .entry((category, article.source.id.clone()))
                .or_default()
                .push((fetched_at, article));
        }

        let snapshots = grouped
            .into_iter()
            .filter_map(|((category, source_id), rows)| {
                let latest = rows.iter().map(|(fetched_at, _)| *fetched_at).max()?;
                let articles = rows
                    .into_iter()
                    .filter(|(fetched_at, _)| *fetched_at == latest)
                    .map(|(_, article)| article)
                    .collect();
                Some(ArchivedSnapshot {
                    category,
                    source_id,
                    articles,
                    fetched_at: latest,
                })
            })
            .collect();

        Ok(snapshots)
    }

    /// Delete articles fetched more than `retention_days` ago
    pub async fn cleanup_old(&self, retention_days: u32) -> Result<u64> {
        let pool = self.db.pool().clone();
        let cutoff = Utc::now() - Duration::days(retention_days as i64);

        let deleted = with_retry(|| {
            let pool = pool.clone();
            async move {
                sqlx::query("DELETE FROM articles WHERE fetched_at < ?")
                    .bind(cutoff)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
            }
        })
        .await?;

        Ok(deleted)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}
