//! HTTP API for the order fulfillment services.
//!
//! Provides REST endpoints for order creation, order reads, status updates
//! and product reads, with structured logging (tracing) and Prometheus
//! metrics. The binaries `order-service` and `stock-consumer` are built on
//! the helpers in [`backends`] and [`telemetry`].

pub mod backends;
pub mod config;
pub mod error;
pub mod routes;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use cache::SharedCacheStore;
use common::SharedObserver;
use domain::{InventoryService, OrderService};
use events::{OrderEventPublisher, SharedBus};
use ledger::Ledger;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, LogFormat};
use routes::orders::{AppState, Backends};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: Ledger + 'static>(
    state: Arc<AppState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<L>))
        .route("/orders", post(routes::orders::create::<L>))
        .route("/orders/{id}", get(routes::orders::get::<L>))
        .route("/orders/{id}/status", patch(routes::orders::update_status::<L>))
        .route("/users/{user_id}/orders", get(routes::orders::list_for_user::<L>))
        .route("/products/{id}", get(routes::products::get::<L>))
        .route("/products/{id}/stock", post(routes::products::adjust_stock::<L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the services over the given backends.
pub fn create_state<L: Ledger + Clone + 'static>(
    ledger: L,
    cache: SharedCacheStore,
    bus: SharedBus,
    config: &Config,
    observer: SharedObserver,
    backends: Backends,
) -> Arc<AppState<L>> {
    let orders = OrderService::new(ledger.clone(), Arc::clone(&cache))
        .with_cache_settings(config.cache_settings())
        .with_policy(config.stock_policy)
        .with_timeout(config.order_timeout)
        .with_observer(Arc::clone(&observer));
    let inventory = InventoryService::new(ledger, Arc::clone(&cache))
        .with_cache(cache, config.cache_settings())
        .with_observer(Arc::clone(&observer));
    let publisher = OrderEventPublisher::new(bus).with_observer(observer);

    Arc::new(AppState {
        orders,
        inventory,
        publisher,
        backends,
    })
}
