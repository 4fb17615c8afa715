use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{CacheError, CacheStore, Result};

/// In-memory cache store backed by a `DashMap`.
///
/// Each entry stores `(value, inserted_at, ttl)`. Expired entries are evicted
/// when read, and swept from the whole map on every write.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    inner: Arc<DashMap<String, (Bytes, Instant, Duration)>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns true if an unexpired entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .is_some_and(|entry| entry.value().1.elapsed() < entry.value().2)
    }

    /// Returns the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drops every expired entry. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let before = self.inner.len();
        self.inner
            .retain(|_, (_, inserted, ttl)| inserted.elapsed() < *ttl);
        before.saturating_sub(self.inner.len())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("cache unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        if let Some(entry) = self.inner.get(key) {
            let (val, inserted, ttl) = entry.value();
            if inserted.elapsed() < *ttl {
                return Ok(Some(val.clone()));
            }
            drop(entry);
            self.inner.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.sweep_expired();
        self.inner
            .insert(key.to_string(), (value, Instant::now(), ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.inner.remove(key);
        Ok(())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<u64> {
        self.check_available()?;
        self.sweep_expired();
        let before = self.inner.len();
        self.inner.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.inner.len()) as u64)
    }
}
