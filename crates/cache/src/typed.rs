//! Typed caches layered over a [`CacheStore`].
//!
//! Every operation is bounded by the configured timeout so a slow backend
//! degrades to a miss instead of stalling the request.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use common::{OrderPage, PageRequest, Product, ProductId, UserId};
use serde::{Serialize, de::DeserializeOwned};

use crate::{CacheError, Result, SharedCacheStore};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default per-operation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// Returns the cache key for a product.
pub fn product_key(id: ProductId) -> String {
    format!("product:{id}")
}

/// Returns the cache key for one page of a user's orders.
pub fn orders_key(user_id: UserId, page: PageRequest) -> String {
    format!("orders:{user_id}:{}:{}", page.page, page.page_size)
}

/// Returns the prefix shared by every cached page of a user's orders.
pub fn orders_prefix(user_id: UserId) -> String {
    format!("orders:{user_id}:")
}

/// TTL and deadline applied by the typed caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Clone)]
struct TypedCache {
    store: SharedCacheStore,
    settings: CacheSettings,
}

impl TypedCache {
    async fn bounded<T>(&self, key: &str, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.settings.timeout, op)
            .await
            .map_err(|_| CacheError::Timeout {
                key: key.to_string(),
                after: self.settings.timeout,
            })?
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.bounded(key, self.store.get(key)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.bounded(key, self.store.set(key, bytes, self.settings.ttl))
            .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.bounded(key, self.store.remove(key)).await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<u64> {
        self.bounded(prefix, self.store.remove_by_prefix(prefix))
            .await
    }
}

/// Cache of product snapshots keyed by `product:<id>`.
#[derive(Clone)]
pub struct ProductCache {
    inner: TypedCache,
}

impl ProductCache {
    pub fn new(store: SharedCacheStore, settings: CacheSettings) -> Self {
        Self {
            inner: TypedCache { store, settings },
        }
    }

    pub async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        self.inner.get(&product_key(id)).await
    }

    pub async fn put(&self, product: &Product) -> Result<()> {
        self.inner.set(&product_key(product.id), product).await
    }

    pub async fn invalidate(&self, id: ProductId) -> Result<()> {
        self.inner.remove(&product_key(id)).await
    }
}

/// Cache of order pages keyed by `orders:<user>:<page>:<size>`.
#[derive(Clone)]
pub struct OrderCache {
    inner: TypedCache,
}

impl OrderCache {
    pub fn new(store: SharedCacheStore, settings: CacheSettings) -> Self {
        Self {
            inner: TypedCache { store, settings },
        }
    }

    pub async fn get(&self, user_id: UserId, page: PageRequest) -> Result<Option<OrderPage>> {
        self.inner.get(&orders_key(user_id, page)).await
    }

    pub async fn put(&self, user_id: UserId, page: &OrderPage) -> Result<()> {
        let key = orders_key(user_id, PageRequest::new(page.page, page.page_size));
        self.inner.set(&key, page).await
    }

    /// Drops every cached page for the user.
    pub async fn invalidate_user(&self, user_id: UserId) -> Result<u64> {
        self.inner.remove_by_prefix(&orders_prefix(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use common::{Money, Order, OrderId};

    use super::*;
    use crate::{CacheStore, InMemoryCacheStore};

    /// Backend that never answers.
    struct StalledStore;

    #[async_trait]
    impl CacheStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
            std::future::pending().await
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn remove_by_prefix(&self, _prefix: &str) -> Result<u64> {
            std::future::pending().await
        }
    }

    fn page_of(user_id: UserId, page: PageRequest) -> OrderPage {
        OrderPage {
            orders: vec![Order::new(OrderId::new(), user_id)],
            total: 1,
            page: page.page,
            page_size: page.page_size,
        }
    }

    #[test]
    fn test_key_formats() {
        let product_id = ProductId::new();
        let user_id = UserId::new();
        assert_eq!(product_key(product_id), format!("product:{product_id}"));
        assert_eq!(
            orders_key(user_id, PageRequest::new(2, 10)),
            format!("orders:{user_id}:2:10")
        );
        assert!(orders_key(user_id, PageRequest::new(1, 5)).starts_with(&orders_prefix(user_id)));
    }

    #[tokio::test]
    async fn test_product_round_trip_and_invalidate() {
        let cache = ProductCache::new(Arc::new(InMemoryCacheStore::new()), CacheSettings::default());
        let product = Product::new("Widget", "tools", 5, Money::from_cents(1000));

        assert_eq!(cache.get(product.id).await.unwrap(), None);
        cache.put(&product).await.unwrap();
        assert_eq!(cache.get(product.id).await.unwrap(), Some(product.clone()));

        cache.invalidate(product.id).await.unwrap();
        assert_eq!(cache.get(product.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_user_drops_every_page() {
        let store = InMemoryCacheStore::new();
        let cache = OrderCache::new(Arc::new(store.clone()), CacheSettings::default());
        let user_id = UserId::new();
        let other_user = UserId::new();

        for page in [PageRequest::new(1, 10), PageRequest::new(2, 10)] {
            cache.put(user_id, &page_of(user_id, page)).await.unwrap();
        }
        let other_page = PageRequest::new(1, 10);
        cache
            .put(other_user, &page_of(other_user, other_page))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_user(user_id).await.unwrap(), 2);
        assert!(cache.get(user_id, PageRequest::new(1, 10)).await.unwrap().is_none());
        assert!(cache.get(other_user, other_page).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let settings = CacheSettings {
            ttl: DEFAULT_TTL,
            timeout: Duration::from_millis(10),
        };
        let cache = ProductCache::new(Arc::new(StalledStore), settings);

        let err = cache.get(ProductId::new()).await.unwrap_err();
        assert!(matches!(err, CacheError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_an_error() {
        let store = InMemoryCacheStore::new();
        let product_id = ProductId::new();
        store
            .set(&product_key(product_id), Bytes::from_static(b"not json"), DEFAULT_TTL)
            .await
            .unwrap();
        let cache = ProductCache::new(Arc::new(store), CacheSettings::default());

        assert!(matches!(
            cache.get(product_id).await,
            Err(CacheError::Serialization(_))
        ));
    }
}
