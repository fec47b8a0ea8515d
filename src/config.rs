use std::{env, str::FromStr};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub page_cache_ttl_secs: u64,
    pub page_cache_capacity: usize,
    /// Posts of a deleted user are handed over to this account.
    pub fallback_author_id: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            database_url: required("DATABASE_URL")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            token_ttl_secs: parsed("TOKEN_TTL_SECS", 86_400)?,
            page_cache_ttl_secs: parsed("PAGE_CACHE_TTL_SECS", 20)?,
            page_cache_capacity: parsed("PAGE_CACHE_CAPACITY", 256)?,
            fallback_author_id: parsed("FALLBACK_AUTHOR_ID", 1)?,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
