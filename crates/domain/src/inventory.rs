//! Inventory service: cache-aside product reads and stock adjustments.

use std::sync::Arc;

use async_trait::async_trait;
use cache::{CacheSettings, ProductCache, SharedCacheStore, product_key};
use common::{LifecycleEvent, NoopObserver, Product, ProductId, SharedObserver};
use ledger::StockLedger;

use crate::error::Result;

/// Applies signed stock changes.
///
/// The stock consumer depends on this seam instead of on a concrete ledger.
#[async_trait]
pub trait StockAdjuster: Send + Sync {
    /// Applies `delta` to the product's stock and returns the committed product.
    async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<Product>;
}

/// Product reads through the product cache, and stock adjustments that keep
/// the cache coherent.
#[derive(Clone)]
pub struct InventoryService<L: StockLedger> {
    ledger: L,
    cache: ProductCache,
    observer: SharedObserver,
}

impl<L: StockLedger> InventoryService<L> {
    pub fn new(ledger: L, cache: SharedCacheStore) -> Self {
        Self {
            ledger,
            cache: ProductCache::new(cache, CacheSettings::default()),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_cache(mut self, cache: SharedCacheStore, settings: CacheSettings) -> Self {
        self.cache = ProductCache::new(cache, settings);
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Returns a reference to the underlying ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Reads a product, preferring the cache.
    ///
    /// A miss or a cache failure falls through to the ledger; the result is
    /// written back on a best-effort basis.
    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product> {
        let key = product_key(id);
        match self.cache.get(id).await {
            Ok(Some(product)) => {
                self.observer.observe(LifecycleEvent::CacheHit { key });
                return Ok(product);
            }
            Ok(None) => self.observer.observe(LifecycleEvent::CacheMiss { key: key.clone() }),
            Err(err) => {
                tracing::warn!(%key, error = %err, "Product cache read failed, using ledger");
                self.observer.observe(LifecycleEvent::CacheMiss { key: key.clone() });
            }
        }

        let product = self.ledger.get_product(id).await?;
        if let Err(err) = self.cache.put(&product).await {
            self.observer.observe(LifecycleEvent::CachePopulateFailed {
                key,
                error: err.to_string(),
            });
        }
        Ok(product)
    }

    /// Applies a signed stock change and drops the product's cache entry.
    ///
    /// Positive deltas restock. A change that would drive stock negative is
    /// rejected with `InsufficientStock` and nothing is written.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<Product> {
        let product = self.ledger.adjust_stock(id, delta).await?;

        let key = product_key(id);
        match self.cache.invalidate(id).await {
            Ok(()) => self.observer.observe(LifecycleEvent::CacheInvalidated { key }),
            Err(err) => self.observer.observe(LifecycleEvent::CacheInvalidationFailed {
                key,
                error: err.to_string(),
            }),
        }
        Ok(product)
    }
}

#[async_trait]
impl<L: StockLedger> StockAdjuster for InventoryService<L> {
    async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<Product> {
        InventoryService::adjust_stock(self, product_id, delta).await
    }
}

#[async_trait]
impl<T: StockAdjuster + ?Sized> StockAdjuster for Arc<T> {
    async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<Product> {
        (**self).adjust_stock(product_id, delta).await
    }
}
