use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::news::Category;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub trending: TrendingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Persist fetched articles to SQLite so the cache survives restarts
    #[serde(default)]
    pub archive_enabled: bool,
    /// Archived article retention in days
    #[serde(default = "default_retention_days")]
    pub archive_retention_days: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            archive_enabled: false,
            archive_retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds after which a cached source result is considered stale
    #[serde(default = "default_cache_expiration")]
    pub expiration_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_cache_expiration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Category served when a request names none
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Upper bound that requested page sizes are clamped to
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// How many items each adapter is asked for per fetch
    #[serde(default = "default_source_fetch_limit")]
    pub source_fetch_limit: usize,
    #[serde(default = "default_trending_limit")]
    pub trending_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_category: default_category(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            source_fetch_limit: default_source_fetch_limit(),
            trending_limit: default_trending_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Per-adapter call timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum number of sources fetched at once for one aggregation
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// How often the background warmer looks for sources due a refresh,
    /// in seconds (0 = disabled). Each source has its own refresh interval.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// HTTP proxy URL for upstream requests (e.g., "http://127.0.0.1:7890" or "socks5://127.0.0.1:1080")
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_timeout(),
            fetch_concurrency: default_fetch_concurrency(),
            refresh_interval_secs: default_refresh_interval(),
            proxy_url: None,
        }
    }
}

/// Weights of the trending score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingConfig {
    #[serde(default = "default_likes_weight")]
    pub likes_weight: f64,
    #[serde(default = "default_comments_weight")]
    pub comments_weight: f64,
    /// Age in hours after which an article's score is halved
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            likes_weight: default_likes_weight(),
            comments_weight: default_comments_weight(),
            half_life_hours: default_half_life_hours(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub hacker_news: HackerNewsConfig,
    #[serde(default)]
    pub github_trending: GitHubTrendingConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HackerNewsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_hn_api_url")]
    pub api_url: String,
    /// Seconds between background refreshes of this source
    #[serde(default = "default_fast_source_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_hn_api_url(),
            refresh_interval_secs: default_fast_source_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubTrendingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_github_trending_url")]
    pub url: String,
    /// The trending page changes slowly
    #[serde(default = "default_slow_source_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for GitHubTrendingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_github_trending_url(),
            refresh_interval_secs: default_slow_source_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// One adapter is registered per subreddit
    #[serde(default = "default_subreddits")]
    pub subreddits: Vec<String>,
    /// Applies to every subreddit adapter
    #[serde(default = "default_fast_source_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subreddits: default_subreddits(),
            refresh_interval_secs: default_fast_source_interval(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsstation")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u32 {
    3
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cache_expiration() -> u64 {
    1800 // 30 minutes
}

fn default_category() -> String {
    "realtime".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_source_fetch_limit() -> usize {
    30
}

fn default_trending_limit() -> usize {
    10
}

fn default_timeout() -> u64 {
    10
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_likes_weight() -> f64 {
    1.0
}

fn default_comments_weight() -> f64 {
    2.0
}

fn default_half_life_hours() -> f64 {
    12.0
}

fn default_fast_source_interval() -> u64 {
    300
}

fn default_slow_source_interval() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_hn_api_url() -> String {
    "https://hacker-news.firebaseio.com/v0".to_string()
}

fn default_github_trending_url() -> String {
    "https://github.com/trending".to_string()
}

fn default_subreddits() -> Vec<String> {
    ["worldnews", "technology", "science", "politics", "business"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file (or defaults), then apply environment overrides
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Apply `NEWSSTATION_*` overrides using the given variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("NEWSSTATION_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("NEWSSTATION_PORT") {
            self.server.port = parse_env("NEWSSTATION_PORT", &port)?;
        }
        if let Some(secs) = lookup("NEWSSTATION_CACHE_EXPIRATION") {
            self.cache.expiration_secs = parse_env("NEWSSTATION_CACHE_EXPIRATION", &secs)?;
        }
        if let Some(category) = lookup("NEWSSTATION_DEFAULT_CATEGORY") {
            self.feed.default_category = category;
        }
        if let Some(size) = lookup("NEWSSTATION_PAGE_SIZE") {
            self.feed.default_page_size = parse_env("NEWSSTATION_PAGE_SIZE", &size)?;
        }
        if let Some(level) = lookup("NEWSSTATION_LOG_LEVEL") {
            self.general.log_level = level;
        }
        if let Some(dir) = lookup("NEWSSTATION_DATA_DIR") {
            self.general.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let feed = &self.feed;
        if feed.default_page_size == 0 || feed.max_page_size == 0 {
            return Err(crate::Error::Config("page sizes must be greater than zero".into()));
        }
        if feed.default_page_size > feed.max_page_size {
            return Err(crate::Error::Config(format!(
                "default_page_size ({}) exceeds max_page_size ({})",
                feed.default_page_size, feed.max_page_size
            )));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(crate::Error::Config("request_timeout_secs must be greater than zero".into()));
        }
        if self.sync.fetch_concurrency == 0 {
            return Err(crate::Error::Config("fetch_concurrency must be greater than zero".into()));
        }
        if !(self.trending.half_life_hours > 0.0) {
            return Err(crate::Error::Config("half_life_hours must be positive".into()));
        }
        self.default_category()?;
        Ok(())
    }

    /// The configured default category, parsed
    pub fn default_category(&self) -> crate::Result<Category> {
        self.feed
            .default_category
            .parse()
            .map_err(|_| crate::Error::Config(format!("unknown default category '{}'", self.feed.default_category)))
    }

    /// Get the configuration file path
    /// Always uses ~/.config/newsstation/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("newsstation")
            .join("config.toml")
    }

    /// Get the archive database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("newsstation.db")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.cache.expiration_secs, 1800);
        assert_eq!(config.feed.default_page_size, 20);
        assert_eq!(config.feed.default_category, "realtime");
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [cache]
            expiration_secs = 60

            [sources.reddit]
            subreddits = ["rust"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.expiration_secs, 60);
        assert_eq!(config.sources.reddit.subreddits, vec!["rust".to_string()]);
        assert!(config.sources.reddit.enabled);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("NEWSSTATION_PORT", "9090"),
            ("NEWSSTATION_CACHE_EXPIRATION", "120"),
            ("NEWSSTATION_DEFAULT_CATEGORY", "world"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.cache.expiration_secs, 120);
        assert_eq!(config.default_category().unwrap(), Category::World);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|key| {
            (key == "NEWSSTATION_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_page_sizes() {
        let mut config = AppConfig::default();
        config.feed.default_page_size = 200;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.feed.default_category = "gossip".to_string();
        assert!(config.validate().is_err());
    }
}
