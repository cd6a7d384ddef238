use std::time::Duration;

use crate::domain::model::id::BookId;
use crate::domain::model::query::DEFAULT_TREE_TAKE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// 実行時設定。環境変数（と `.env`）から読む。
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub default_book: Option<BookId>,
    pub tree_take: u32,
    pub search_settle: Duration,
    pub http_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get = &get;

        let api_url = get("BOOKTREE_API_URL").ok_or(ConfigError::Missing("BOOKTREE_API_URL"))?;
        let tree_take = parse_or(get, "BOOKTREE_PAGE_TAKE", DEFAULT_TREE_TAKE)?;
        let settle_ms: u64 = parse_or(get, "BOOKTREE_SEARCH_SETTLE_MS", 500)?;
        let timeout_secs: u64 = parse_or(get, "BOOKTREE_HTTP_TIMEOUT_SECS", 30)?;

        if tree_take == 0 {
            return Err(ConfigError::Invalid {
                key: "BOOKTREE_PAGE_TAKE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            api_url,
            token: get("BOOKTREE_TOKEN"),
            default_book: get("BOOKTREE_BOOK_ID").map(BookId::new),
            tree_take,
            search_settle: Duration::from_millis(settle_ms),
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
