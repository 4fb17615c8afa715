use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// A byte-oriented key/value store with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Removes every key starting with `prefix` and returns how many were removed.
    async fn remove_by_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Shared handle to a cache backend.
pub type SharedCacheStore = Arc<dyn CacheStore>;
