use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use super::http::HttpFetcher;
use super::NewsSource;
use crate::error::FetchFailureKind;
use crate::news::{Article, Category, SourceInfo};
use crate::{Error, Result};

const SOURCE_ID: &str = "github_trending";
const ID_PREFIX: &str = "github";
const GITHUB_BASE: &str = "https://github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";
const README_BRANCHES: &[&str] = &["main", "master"];

/// Trending repositories scraped from github.com/trending
pub struct GitHubTrendingSource {
    http: HttpFetcher,
    url: String,
    info: SourceInfo,
}

impl GitHubTrendingSource {
    pub fn new(http: HttpFetcher, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
            info: SourceInfo::new(SOURCE_ID, "GitHub Trending"),
        }
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| {
        Error::fetch(SOURCE_ID, FetchFailureKind::Invalid, format!("bad selector '{}': {}", css, e))
    })
}

/// Stable article id derived from the repository URL
fn article_id(repo_url: &str) -> String {
    let digest = Sha256::digest(repo_url.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", ID_PREFIX, hex)
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// "12,345" -> 12345; GitHub formats star counts with separators
fn parse_count(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

struct Selectors {
    row: Selector,
    link: Selector,
    description: Selector,
    stars: Selector,
    language: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            row: selector("article.Box-row")?,
            link: selector("h2 a")?,
            description: selector("p")?,
            stars: selector(r#"a[href$="/stargazers"]"#)?,
            language: selector(r#"span[itemprop="programmingLanguage"]"#)?,
        })
    }
}

/// Parse the trending page. Rank `i` is given a publish time of `now - i hours`,
/// since the page carries no timestamps.
fn parse_trending(
    html: &str,
    info: &SourceInfo,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Article>> {
    let selectors = Selectors::new()?;
    let document = Html::parse_document(html);
    let mut articles = Vec::new();

    for (rank, row) in document.select(&selectors.row).take(limit).enumerate() {
        let Some(href) = row
            .select(&selectors.link)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            tracing::warn!("Could not find repository path for trending item {}", rank + 1);
            continue;
        };

        let path = href.trim().trim_matches('/');
        let mut parts = path.split('/');
        let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
            tracing::warn!("Unexpected repository path '{}'", href);
            continue;
        };
        if owner.is_empty() || repo.is_empty() {
            continue;
        }

        let repo_url = format!("{}/{}/{}", GITHUB_BASE, owner, repo);
        let description = row
            .select(&selectors.description)
            .next()
            .map(element_text)
            .filter(|d| !d.is_empty());
        let stars = row
            .select(&selectors.stars)
            .next()
            .and_then(|a| parse_count(&element_text(a)));
        let language = row
            .select(&selectors.language)
            .next()
            .map(element_text)
            .filter(|l| !l.is_empty());

        let mut tags = vec!["github-trending".to_string()];
        if let Some(language) = language {
            tags.push(language.to_lowercase());
        }

        articles.push(Article {
            id: article_id(&repo_url),
            title: format!("{}/{}", owner, repo),
            url: repo_url,
            summary: description,
            content: None,
            published_at: now - Duration::hours(rank as i64),
            source: info.clone(),
            author: Some(owner.to_string()),
            image_url: None,
            tags,
            likes_count: Some(stars.unwrap_or(0)),
            comments_count: None,
            category: Category::Technology,
        });
    }

    Ok(articles)
}

/// `https://github.com/owner/repo` -> `owner/repo`
fn repo_path(url: &str) -> Option<&str> {
    let path = url.split_once("github.com/")?.1.trim_matches('/');
    if path.split('/').count() >= 2 {
        Some(path)
    } else {
        None
    }
}

#[async_trait]
impl NewsSource for GitHubTrendingSource {
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
        let html = self.http.get_text(SOURCE_ID, &self.url).await?;
        let articles = parse_trending(&html, &self.info, Utc::now(), limit)?;

        if articles.is_empty() {
            return Err(Error::fetch(
                SOURCE_ID,
                FetchFailureKind::Empty,
                "no repositories found on trending page",
            ));
        }

        tracing::info!("Fetched {} articles from GitHub Trending", articles.len());
        Ok(articles)
    }

    /// The repository README, trying the `main` branch then `master`
    async fn fetch_content(&self, article: &Article) -> Result<Option<String>> {
        let Some(path) = repo_path(&article.url) else {
            return Ok(None);
        };

        for branch in README_BRANCHES {
            let url = format!("{}/{}/{}/README.md", RAW_BASE, path, branch);
            let (status, body) = self.http.get_with_status(SOURCE_ID, &url).await?;
            if status.is_success() {
                let readme = String::from_utf8_lossy(&body).trim().to_string();
                return Ok((!readme.is_empty()).then_some(readme));
            }
            if status != StatusCode::NOT_FOUND {
                return Err(Error::fetch(
                    SOURCE_ID,
                    FetchFailureKind::Unreachable,
                    format!("HTTP {} for {}", status, url),
                ));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRENDING_HTML: &str = r#"
    <html><body>
      <article class="Box-row">
        <h2 class="h3 lh-condensed">
          <a href="/rust-lang/rust">rust-lang / <span>rust</span></a>
        </h2>
        <p class="col-9 color-fg-muted my-1 pr-4">
          Empowering everyone to build reliable and efficient software.
        </p>
        <div>
          <span itemprop="programmingLanguage">Rust</span>
          <a class="Link--muted" href="/rust-lang/rust/stargazers">101,234</a>
          <a class="Link--muted" href="/rust-lang/rust/forks">12,000</a>
        </div>
      </article>
      <article class="Box-row">
        <h2><span>missing link</span></h2>
      </article>
      <article class="Box-row">
        <h2><a href="/tokio-rs/tokio">tokio</a></h2>
      </article>
    </body></html>
    "#;

    fn info() -> SourceInfo {
        SourceInfo::new(SOURCE_ID, "GitHub Trending")
    }

    #[test]
    fn test_parse_trending() {
        let now = Utc::now();
        let articles = parse_trending(TRENDING_HTML, &info(), now, 25).unwrap();
        assert_eq!(articles.len(), 2);

        let rust = &articles[0];
        assert_eq!(rust.title, "rust-lang/rust");
        assert_eq!(rust.url, "https://github.com/rust-lang/rust");
        assert_eq!(
            rust.summary.as_deref(),
            Some("Empowering everyone to build reliable and efficient software.")
        );
        assert_eq!(rust.likes_count, Some(101_234));
        assert_eq!(rust.tags, vec!["github-trending", "rust"]);
        assert_eq!(rust.author.as_deref(), Some("rust-lang"));
        assert_eq!(rust.published_at, now);

        let tokio = &articles[1];
        assert_eq!(tokio.title, "tokio-rs/tokio");
        assert_eq!(tokio.summary, None);
        assert_eq!(tokio.likes_count, Some(0));
        assert_eq!(tokio.published_at, now - Duration::hours(2));
    }

    #[test]
    fn test_parse_trending_respects_limit() {
        let articles = parse_trending(TRENDING_HTML, &info(), Utc::now(), 1).unwrap();
        assert_eq!(articles.len(), 1);
    }

    #[test]
    fn test_article_id_is_stable() {
        let a = article_id("https://github.com/rust-lang/rust");
        assert_eq!(a, article_id("https://github.com/rust-lang/rust"));
        assert_ne!(a, article_id("https://github.com/tokio-rs/tokio"));
        assert!(a.starts_with("github-"));
        assert_eq!(a.len(), "github-".len() + 16);
    }

    #[test]
    fn test_repo_path() {
        assert_eq!(repo_path("https://github.com/rust-lang/rust"), Some("rust-lang/rust"));
        assert_eq!(repo_path("https://github.com/rust-lang"), None);
        assert_eq!(repo_path("https://example.com/a/b"), None);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 1,234 "), Some(1234));
        assert_eq!(parse_count("n/a"), None);
    }
}
