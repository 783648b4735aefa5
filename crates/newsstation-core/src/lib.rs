pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod news;
pub mod query;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod storage;

pub use aggregator::{Aggregation, Aggregator, SourceFailure};
pub use cache::AggregationCache;
pub use config::AppConfig;
pub use error::{Error, FetchFailureKind, Result};
pub use news::{Article, Category, NewsFeed, SortOrder};
pub use query::QueryService;
