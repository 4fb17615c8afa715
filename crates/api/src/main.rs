//! Order service entry point.
//!
//! Serves the REST API. Without `NATS_URL` the stock consumer runs in the
//! same process on the in-process bus.

use std::sync::Arc;

use api::backends::{self, Bus};
use api::routes::orders::Backends;
use api::shutdown::{join_task, shutdown_signal};
use api::{Config, telemetry};
use cache::SharedCacheStore;
use common::{SharedObserver, TracingObserver};
use events::{InMemoryBus, StockConsumer};
use ledger::{InMemoryLedger, Ledger, PostgresLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // 1. Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing and the Prometheus recorder
    telemetry::init_tracing(&config);
    let metrics_handle =
        telemetry::install_metrics().expect("failed to install Prometheus recorder");
    let observer = TracingObserver::shared();

    // 3. Connect backends
    let (cache, cache_name) = backends::connect_cache(&config)
        .await
        .expect("failed to connect to Redis");
    let bus = backends::connect_bus(&config)
        .await
        .expect("failed to connect to NATS");

    // 4. Serve over the configured ledger
    match &config.database_url {
        Some(url) => {
            let ledger = PostgresLedger::connect(url, config.database_max_connections)
                .await
                .expect("failed to connect to PostgreSQL")
                .with_observer(Arc::clone(&observer));
            ledger
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let backends = Backends {
                ledger: "postgres",
                cache: cache_name,
                bus: bus.name(),
            };
            serve(ledger, cache, bus, &config, observer, backends, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-process ledger");
            let ledger = InMemoryLedger::new().with_observer(Arc::clone(&observer));
            let backends = Backends {
                ledger: "memory",
                cache: cache_name,
                bus: bus.name(),
            };
            serve(ledger, cache, bus, &config, observer, backends, metrics_handle).await;
        }
    }
}

async fn serve<L: Ledger + Clone + 'static>(
    ledger: L,
    cache: SharedCacheStore,
    bus: Bus,
    config: &Config,
    observer: SharedObserver,
    backends: Backends,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_state(
        ledger,
        cache,
        bus.shared(),
        config,
        Arc::clone(&observer),
        backends,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let consumer = match &bus {
        Bus::Memory(memory) => Some(
            spawn_in_process_consumer(&state.inventory, memory, config, observer, stop_rx).await,
        ),
        Bus::Nats(_) => None,
    };

    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, policy = %config.stock_policy, "starting order service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = stop_tx.send(true);
    if let Some(handle) = consumer {
        join_task("stock-consumer", handle).await;
    }
    tracing::info!("server shut down gracefully");
}

async fn spawn_in_process_consumer<L: Ledger + Clone + 'static>(
    inventory: &domain::InventoryService<L>,
    bus: &InMemoryBus,
    config: &Config,
    observer: SharedObserver,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let consumer = StockConsumer::new(inventory.clone(), bus.clone())
        .with_settings(config.consumer_settings())
        .with_observer(observer);
    let stream = consumer
        .subscribe()
        .await
        .expect("in-process subscription failed");

    tokio::spawn(async move {
        consumer
            .consume(stream, async move {
                let _ = stop.changed().await;
            })
            .await;
    })
}
