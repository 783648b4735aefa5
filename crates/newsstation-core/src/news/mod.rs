mod models;

pub use models::{Article, Category, CategorySummary, NewsFeed, SortOrder, SourceInfo};
