use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::AppState;
use crate::news::{Article, Category, CategorySummary, NewsFeed, SortOrder};
use crate::Result;

fn params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    Ok(query?.0)
}

fn parse_category(state: &AppState, category: Option<&str>) -> Result<Category> {
    match category.map(str::trim).filter(|c| !c.is_empty()) {
        Some(name) => name.parse(),
        None => Ok(state.default_category),
    }
}

#[derive(Debug, Deserialize)]
pub struct NewsParams {
    category: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    #[serde(default)]
    refresh: bool,
    sort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(alias = "q")]
    query: Option<String>,
    category: Option<String>,
    source: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SourceParams {
    category: Option<String>,
    limit: Option<i64>,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct SourceSummary {
    id: String,
    name: String,
    categories: Vec<Category>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_news(
    State(state): State<AppState>,
    query: std::result::Result<Query<NewsParams>, QueryRejection>,
) -> Result<Json<NewsFeed>> {
    let params = params(query)?;
    let category = parse_category(&state, params.category.as_deref())?;
    let sort = match params.sort.as_deref() {
        Some(sort) => sort.parse()?,
        None => SortOrder::default(),
    };

    let feed = state
        .query
        .list_articles(category, params.page, params.limit, params.refresh, sort)
        .await?;
    Ok(Json(feed))
}

pub async fn get_article(
    State(state): State<AppState>,
    Path(article_id): Path<String>,
) -> Result<Json<Article>> {
    Ok(Json(state.query.get_article(&article_id).await?))
}

pub async fn get_article_content(
    State(state): State<AppState>,
    Path(article_id): Path<String>,
) -> Result<Json<Value>> {
    let content = state.query.get_article_content(&article_id).await?;
    Ok(Json(json!({ "id": article_id, "content": content })))
}

pub async fn list_categories(State(state): State<AppState>) -> Json<Vec<CategorySummary>> {
    Json(state.query.get_categories().await)
}

pub async fn trending(
    State(state): State<AppState>,
    query: std::result::Result<Query<TrendingParams>, QueryRejection>,
) -> Result<Json<Vec<Article>>> {
    let params = params(query)?;
    Ok(Json(state.query.get_trending(params.limit).await?))
}

pub async fn search(
    State(state): State<AppState>,
    query: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<Article>>> {
    let params = params(query)?;
    let category = match params.category.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Some(name.parse()?),
        _ => None,
    };
    let source = params.source.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let results = state
        .query
        .search(
            params.query.as_deref().unwrap_or_default(),
            category,
            source,
            params.limit,
        )
        .await?;
    Ok(Json(results))
}

pub async fn source_news(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    query: std::result::Result<Query<SourceParams>, QueryRejection>,
) -> Result<Json<Vec<Article>>> {
    let params = params(query)?;
    let category = parse_category(&state, params.category.as_deref())?;

    let articles = state
        .query
        .get_source_news(&source_id, category, params.limit, params.refresh)
        .await?;
    Ok(Json(articles))
}

pub async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceSummary>> {
    let sources = state
        .query
        .aggregator()
        .registry()
        .all()
        .iter()
        .map(|source| SourceSummary {
            id: source.info().id.clone(),
            name: source.info().name.clone(),
            categories: Category::ALL
                .into_iter()
                .filter(|c| source.serves(*c))
                .collect(),
        })
        .collect();
    Json(sources)
}
