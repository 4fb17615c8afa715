//! Read-through caches in front of the ledger.
//!
//! Cached values are disposable derived data. The typed caches bound every
//! backend call with a deadline and report failures as errors the caller
//! downgrades to misses.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod typed;

pub use error::{CacheError, Result};
pub use memory::InMemoryCacheStore;
pub use redis_store::RedisCacheStore;
pub use store::{CacheStore, SharedCacheStore};
pub use typed::{
    CacheSettings, DEFAULT_TIMEOUT, DEFAULT_TTL, OrderCache, ProductCache, orders_key,
    orders_prefix, product_key,
};
