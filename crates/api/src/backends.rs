//! Backend selection: real services when a URL is configured, in-process
//! implementations otherwise.

use std::sync::Arc;

use cache::{InMemoryCacheStore, RedisCacheStore, SharedCacheStore};
use events::{DEFAULT_QUEUE_GROUP, InMemoryBus, NatsBus, SharedBus};

use crate::config::Config;

/// A connected message bus.
pub enum Bus {
    Nats(NatsBus),
    /// In-process bus; only consumers in the same process receive messages.
    Memory(InMemoryBus),
}

impl Bus {
    pub fn name(&self) -> &'static str {
        match self {
            Bus::Nats(_) => "nats",
            Bus::Memory(_) => "memory",
        }
    }

    pub fn shared(&self) -> SharedBus {
        match self {
            Bus::Nats(bus) => Arc::new(bus.clone()),
            Bus::Memory(bus) => Arc::new(bus.clone()),
        }
    }
}

/// Connects to Redis when `REDIS_URL` is set.
pub async fn connect_cache(config: &Config) -> cache::Result<(SharedCacheStore, &'static str)> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisCacheStore::connect(url).await?;
            Ok((Arc::new(store), "redis"))
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process cache");
            Ok((Arc::new(InMemoryCacheStore::new()), "memory"))
        }
    }
}

/// Connects to NATS when `NATS_URL` is set.
pub async fn connect_bus(config: &Config) -> events::Result<Bus> {
    match &config.nats_url {
        Some(url) => {
            let bus = NatsBus::connect(url).await?.with_queue_group(DEFAULT_QUEUE_GROUP);
            Ok(Bus::Nats(bus))
        }
        None => {
            tracing::warn!("NATS_URL not set, using in-process bus");
            Ok(Bus::Memory(InMemoryBus::new().with_history_limit(0)))
        }
    }
}
