use anyhow::Result;
use chrono::{DateTime, Utc};

use newsstation_core::{Article, Category, QueryService, SortOrder};

fn age(published_at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - published_at).num_minutes().max(0);
    match minutes {
        0..=59 => format!("{}m ago", minutes),
        60..=1439 => format!("{}h ago", minutes / 60),
        _ => format!("{}d ago", minutes / 1440),
    }
}

fn print_article(article: &Article) {
    let mut meta = vec![article.source.name.clone(), age(article.published_at)];
    if let Some(likes) = article.likes_count {
        meta.push(format!("{} likes", likes));
    }
    if let Some(comments) = article.comments_count {
        meta.push(format!("{} comments", comments));
    }

    println!("  [{}] {}", article.id, article.title);
    println!("    {}", meta.join(" | "));
    println!("    {}", article.url);
}

fn print_articles(articles: &[Article], empty: &str) {
    if articles.is_empty() {
        println!("{}", empty);
        return;
    }
    for article in articles {
        print_article(article);
        println!();
    }
}

pub async fn list(
    query: &QueryService,
    category: Category,
    page: Option<i64>,
    limit: Option<i64>,
    refresh: bool,
    sort: SortOrder,
) -> Result<()> {
    let feed = query
        .list_articles(category, page, limit, refresh, sort)
        .await?;

    let pages = feed.total.div_ceil(feed.limit.max(1) as usize).max(1);
    println!(
        "{} news, page {} of {} ({} articles)\n",
        feed.category, feed.page, pages, feed.total
    );

    if let Some(notice) = &feed.notice {
        println!("{}", notice);
    } else {
        print_articles(&feed.articles, "No articles on this page.");
    }

    if !feed.failed_sources.is_empty() {
        println!("Unavailable sources: {}", feed.failed_sources.join(", "));
    }
    if let Some(updated) = feed.last_updated {
        println!("Last updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

pub async fn article(query: &QueryService, id: &str, open_in_browser: bool) -> Result<()> {
    let article = query.get_article(id).await?;

    println!("{}\n", article.title);
    println!("Source:    {}", article.source.name);
    println!("Published: {}", article.published_at.format("%Y-%m-%d %H:%M UTC"));
    if let Some(author) = &article.author {
        println!("Author:    {}", author);
    }
    if !article.tags.is_empty() {
        println!("Tags:      {}", article.tags.join(", "));
    }
    println!("URL:       {}", article.url);
    if let Some(summary) = &article.summary {
        println!("\n{}", summary);
    }

    if open_in_browser {
        open::that(&article.url)?;
    }

    Ok(())
}

pub async fn content(query: &QueryService, id: &str) -> Result<()> {
    let content = query.get_article_content(id).await?;
    println!("{}", content);
    Ok(())
}

pub async fn categories(query: &QueryService) -> Result<()> {
    println!("Categories:\n");
    for summary in query.get_categories().await {
        let updated = summary
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<14} {:>4} articles   updated {}",
            summary.category.as_str(),
            summary.article_count,
            updated
        );
    }
    Ok(())
}

pub async fn trending(query: &QueryService, limit: Option<i64>) -> Result<()> {
    let articles = query.get_trending(limit).await?;
    println!("Trending now:\n");
    print_articles(&articles, "Nothing is trending right now.");
    Ok(())
}

pub async fn search(
    query: &QueryService,
    text: &str,
    category: Option<Category>,
    source: Option<&str>,
    limit: Option<i64>,
) -> Result<()> {
    let results = query.search(text, category, source, limit).await?;
    println!("{} results for \"{}\":\n", results.len(), text);
    print_articles(&results, "No matching articles.");
    Ok(())
}

pub async fn source(
    query: &QueryService,
    source_id: &str,
    category: Category,
    limit: Option<i64>,
    refresh: bool,
) -> Result<()> {
    let articles = query
        .get_source_news(source_id, category, limit, refresh)
        .await?;
    println!("{} in {}:\n", source_id, category);
    print_articles(&articles, "This source has no articles in that category.");
    Ok(())
}
