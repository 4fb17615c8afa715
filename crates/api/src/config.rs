//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use cache::CacheSettings;
use domain::StockPolicy;
use events::{ConsumerSettings, RetryPolicy};
use thiserror::Error;

/// A variable was set to a value that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid value '{value}' for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Every backend URL is optional; an unset URL selects the in-process
/// implementation of that backend.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub nats_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub order_timeout: Duration,
    pub stock_policy: StockPolicy,
    pub subscribe_max_attempts: u32,
    pub subscribe_backoff: Duration,
    pub item_max_attempts: u32,
    pub item_backoff: Duration,
    pub consumer_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            nats_url: None,
            cache_ttl: Duration::from_secs(3600),
            cache_timeout: Duration::from_millis(50),
            order_timeout: Duration::from_millis(5000),
            stock_policy: StockPolicy::Both,
            subscribe_max_attempts: 5,
            subscribe_backoff: Duration::from_millis(100),
            item_max_attempts: 3,
            item_backoff: Duration::from_millis(100),
            consumer_concurrency: 16,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset or empty variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&get, "LOG_FORMAT", defaults.log_format)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            redis_url: get("REDIS_URL"),
            nats_url: get("NATS_URL"),
            cache_ttl: Duration::from_secs(parse(
                &get,
                "CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            cache_timeout: millis(&get, "CACHE_TIMEOUT_MS", defaults.cache_timeout)?,
            order_timeout: millis(&get, "ORDER_TIMEOUT_MS", defaults.order_timeout)?,
            stock_policy: parse(&get, "STOCK_POLICY", defaults.stock_policy)?,
            subscribe_max_attempts: parse(
                &get,
                "SUBSCRIBE_MAX_ATTEMPTS",
                defaults.subscribe_max_attempts,
            )?,
            subscribe_backoff: millis(&get, "SUBSCRIBE_BACKOFF_MS", defaults.subscribe_backoff)?,
            item_max_attempts: parse(&get, "ITEM_MAX_ATTEMPTS", defaults.item_max_attempts)?,
            item_backoff: millis(&get, "ITEM_BACKOFF_MS", defaults.item_backoff)?,
            consumer_concurrency: parse(
                &get,
                "CONSUMER_CONCURRENCY",
                defaults.consumer_concurrency,
            )?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: self.cache_ttl,
            timeout: self.cache_timeout,
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            subscribe_retry: RetryPolicy::linear(
                self.subscribe_max_attempts,
                self.subscribe_backoff,
            ),
            item_retry: RetryPolicy::linear(self.item_max_attempts, self.item_backoff),
            concurrency: self.consumer_concurrency,
            policy: self.stock_policy,
            ..ConsumerSettings::default()
        }
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn millis<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse(get, key, default_ms).map(Duration::from_millis)
}
