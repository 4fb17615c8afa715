//! Stock consumer entry point.
//!
//! Subscribes to order-created events and decrements stock for each line
//! item. Exits non-zero if the subscription cannot be established.

use std::process::ExitCode;
use std::sync::Arc;

use api::backends::{self, Bus};
use api::shutdown::shutdown_signal;
use api::{Config, telemetry};
use cache::SharedCacheStore;
use common::{SharedObserver, TracingObserver};
use domain::InventoryService;
use events::{MessageBus, StockConsumer};
use ledger::{InMemoryLedger, PostgresLedger, StockLedger};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("invalid configuration");
    telemetry::init_tracing(&config);
    let observer = TracingObserver::shared();

    let (cache, _) = backends::connect_cache(&config)
        .await
        .expect("failed to connect to Redis");
    let bus = backends::connect_bus(&config)
        .await
        .expect("failed to connect to NATS");
    if matches!(bus, Bus::Memory(_)) {
        tracing::warn!("NATS_URL not set; no producer can reach this consumer");
    }

    let result = match &config.database_url {
        Some(url) => {
            let ledger = PostgresLedger::connect(url, config.database_max_connections)
                .await
                .expect("failed to connect to PostgreSQL")
                .with_observer(Arc::clone(&observer));
            run(ledger, cache, bus.shared(), &config, observer).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-process ledger");
            let ledger = InMemoryLedger::new().with_observer(Arc::clone(&observer));
            run(ledger, cache, bus.shared(), &config, observer).await
        }
    };

    match result {
        Ok(()) => {
            tracing::info!("stock consumer stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "stock consumer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run<L, B>(
    ledger: L,
    cache: SharedCacheStore,
    bus: B,
    config: &Config,
    observer: SharedObserver,
) -> events::Result<()>
where
    L: StockLedger + Clone + 'static,
    B: MessageBus + 'static,
{
    let inventory = InventoryService::new(ledger, Arc::clone(&cache))
        .with_cache(cache, config.cache_settings())
        .with_observer(Arc::clone(&observer));
    let consumer = StockConsumer::new(inventory, bus)
        .with_settings(config.consumer_settings())
        .with_observer(observer);

    tracing::info!(policy = %config.stock_policy, "starting stock consumer");
    consumer.run(shutdown_signal()).await
}
