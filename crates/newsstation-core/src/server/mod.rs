//! JSON HTTP API

mod error;
mod handlers;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::news::Category;
use crate::query::QueryService;
use crate::Result;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    /// Category served when a request names none
    pub default_category: Category,
}

impl AppState {
    pub fn new(config: &AppConfig, query: QueryService) -> Result<Self> {
        Ok(Self {
            query,
            default_category: config.default_category()?,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/news", get(handlers::list_news))
        .route("/api/news/source/{source_id}", get(handlers::source_news))
        .route("/api/news/{article_id}", get(handlers::get_article))
        .route("/api/news/{article_id}/content", get(handlers::get_article_content))
        .route("/api/categories", get(handlers::list_categories))
        .route("/api/trending", get(handlers::trending))
        .route("/api/search", get(handlers::search))
        .route("/api/sources", get(handlers::list_sources))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on the configured address until `shutdown` flips to true
pub async fn serve(
    config: &AppConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    tracing::info!("HTTP API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            tracing::info!("HTTP server shutting down");
        })
        .await?;

    Ok(())
}
