mod article_repo;
mod database;
mod retry;

pub use article_repo::{ArchivedSnapshot, ArticleRepository};
pub use database::Database;
