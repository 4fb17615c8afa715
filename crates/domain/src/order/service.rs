//! Order service: the order orchestrator plus the read and status paths.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cache::{
    CacheSettings, OrderCache, ProductCache, SharedCacheStore, orders_key, orders_prefix,
    product_key,
};
use common::{
    LifecycleEvent, NoopObserver, Order, OrderCreatedEvent, OrderId, OrderPage, OrderStatus,
    PageRequest, SharedObserver, UserId,
};
use ledger::Ledger;

use crate::error::{DomainError, Result};

use super::{CreateOrderRequest, OrderError, OrderLine, StockPolicy, ValidatedOrder};

/// Default deadline for a single unit of work.
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one successful order creation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    /// The order as committed, including items merged from earlier calls.
    pub order: Order,
    /// The items and total this call added.
    pub applied: Order,
}

impl PlacedOrder {
    /// Event announcing what this call added to the order.
    ///
    /// Reusing an order id only announces the new lines, so consumers never
    /// decrement stock for items an earlier call already announced.
    pub fn event(&self) -> OrderCreatedEvent {
        let mut event = OrderCreatedEvent::from(&self.applied);
        event.status = self.order.status;
        event
    }
}

/// Service for creating, reading and updating orders.
///
/// Order creation reserves stock for every line and writes the order inside
/// one unit of work, so either all of it commits or none of it does. Caches
/// are invalidated after the commit and their failures never fail a call.
pub struct OrderService<L: Ledger> {
    ledger: L,
    cache: SharedCacheStore,
    order_cache: OrderCache,
    product_cache: ProductCache,
    policy: StockPolicy,
    timeout: Duration,
    observer: SharedObserver,
}

impl<L: Ledger> OrderService<L> {
    /// Creates a new order service over the given ledger and cache backend.
    pub fn new(ledger: L, cache: SharedCacheStore) -> Self {
        let settings = CacheSettings::default();
        Self {
            ledger,
            order_cache: OrderCache::new(Arc::clone(&cache), settings),
            product_cache: ProductCache::new(Arc::clone(&cache), settings),
            cache,
            policy: StockPolicy::default(),
            timeout: DEFAULT_ORDER_TIMEOUT,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_cache_settings(mut self, settings: CacheSettings) -> Self {
        self.order_cache = OrderCache::new(Arc::clone(&self.cache), settings);
        self.product_cache = ProductCache::new(Arc::clone(&self.cache), settings);
        self
    }

    pub fn with_policy(mut self, policy: StockPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the deadline after which an in-flight unit of work is rolled back.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
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

    pub fn policy(&self) -> StockPolicy {
        self.policy
    }

    /// Validates and creates an order.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        Ok(self.place_order(request).await?.order)
    }

    /// Validates and creates an order, keeping what this call applied.
    pub async fn place_order(&self, request: CreateOrderRequest) -> Result<PlacedOrder> {
        let order = request.validate()?;
        self.place_validated(order).await
    }

    /// Creates an order from already-validated input.
    ///
    /// Returns the committed order. If the order id already named a pending
    /// order of the same user, the returned order includes its earlier items
    /// and total.
    pub async fn create_validated(&self, request: ValidatedOrder) -> Result<Order> {
        Ok(self.place_validated(request).await?.order)
    }

    /// Creates an order from already-validated input and returns both the
    /// committed order and the lines this call applied.
    pub async fn place_validated(&self, request: ValidatedOrder) -> Result<PlacedOrder> {
        let started = Instant::now();
        self.observer.observe(LifecycleEvent::ReservationStarted {
            order_id: request.order_id,
            user_id: request.user_id,
            line_items: request.lines.len(),
        });

        let result = self.within_deadline(self.reserve(&request)).await;
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(placed) => {
                self.observer.observe(LifecycleEvent::ReservationCommitted {
                    order_id: placed.order.id,
                    user_id: placed.order.user_id,
                    total: placed.order.total,
                });
                self.invalidate_orders(placed.order.user_id).await;
                if self.policy.reserves_on_create() {
                    for line in &request.lines {
                        self.invalidate_product(line).await;
                    }
                }
                Ok(placed)
            }
            Err(err) => {
                self.observer.observe(LifecycleEvent::ReservationAborted {
                    order_id: request.order_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn reserve(&self, request: &ValidatedOrder) -> Result<PlacedOrder> {
        // Every early return drops `uow`, which rolls it back.
        let mut uow = self.ledger.begin().await?;

        if let Some(existing) = uow.lock_order(request.order_id).await? {
            if existing.user_id != request.user_id {
                return Err(OrderError::OrderOwnedByAnotherUser {
                    order_id: existing.id,
                }
                .into());
            }
            if existing.status != OrderStatus::Pending {
                return Err(OrderError::OrderNotPending {
                    order_id: existing.id,
                    status: existing.status,
                }
                .into());
            }
        }

        let mut draft = Order::new(request.order_id, request.user_id);
        for line in &request.lines {
            let product = if self.policy.reserves_on_create() {
                uow.reserve_stock(line.product_id, line.quantity).await?
            } else {
                let product = uow.lock_product(line.product_id).await?;
                if !product.has_stock(line.quantity) {
                    return Err(DomainError::InsufficientStock {
                        product_id: product.id,
                        requested: i64::from(line.quantity),
                        available: product.stock,
                    });
                }
                product
            };

            self.observer.observe(LifecycleEvent::StockReserved {
                order_id: request.order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                remaining: product.stock,
            });
            draft.total += product.price.multiply(line.quantity);
            draft.merge_item(line.product_id, line.quantity);
        }

        if !draft.total.is_positive() {
            return Err(OrderError::NonPositiveTotal.into());
        }

        let order = uow.write_order(&draft).await?;
        uow.commit().await?;
        Ok(PlacedOrder {
            order,
            applied: draft,
        })
    }

    /// Loads an order with its items.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.within_deadline(async { Ok(self.ledger.get_order(order_id).await?) })
            .await
    }

    /// Moves an order to a new status.
    ///
    /// Terminal orders and backward moves are rejected. The owner's cached
    /// order pages are dropped after the update commits.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order> {
        let (from, order) = self
            .within_deadline(async {
                let mut uow = self.ledger.begin().await?;
                let current = uow
                    .lock_order(order_id)
                    .await?
                    .ok_or_else(|| DomainError::NotFound {
                        entity: "order",
                        id: order_id.to_string(),
                    })?;

                if !current.status.can_transition_to(status) {
                    return Err(DomainError::InvalidStatusTransition {
                        from: current.status,
                        to: status,
                    });
                }

                let updated = uow.set_status(order_id, status).await?;
                uow.commit().await?;
                Ok((current.status, updated))
            })
            .await?;

        self.observer.observe(LifecycleEvent::StatusUpdated {
            order_id,
            from,
            to: order.status,
        });
        self.invalidate_orders(order.user_id).await;
        Ok(order)
    }

    /// Parses `status` and moves the order to it.
    pub async fn update_order_status_str(&self, order_id: OrderId, status: &str) -> Result<Order> {
        let status: OrderStatus = status.parse().map_err(OrderError::from)?;
        self.update_order_status(order_id, status).await
    }

    /// Lists a user's orders, newest first, through the order cache.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId, page: PageRequest) -> Result<OrderPage> {
        if page.page < 1 || page.page_size < 1 {
            return Err(OrderError::InvalidPage {
                page: i64::from(page.page),
                page_size: i64::from(page.page_size),
            }
            .into());
        }

        let key = orders_key(user_id, page);
        match self.order_cache.get(user_id, page).await {
            Ok(Some(cached)) => {
                self.observer.observe(LifecycleEvent::CacheHit { key });
                return Ok(cached);
            }
            Ok(None) => self.observer.observe(LifecycleEvent::CacheMiss { key: key.clone() }),
            Err(err) => {
                tracing::warn!(%key, error = %err, "Order cache read failed, using ledger");
                self.observer.observe(LifecycleEvent::CacheMiss { key: key.clone() });
            }
        }

        let listed = self
            .within_deadline(async { Ok(self.ledger.list_orders(user_id, page).await?) })
            .await?;

        if let Err(err) = self.order_cache.put(user_id, &listed).await {
            self.observer.observe(LifecycleEvent::CachePopulateFailed {
                key,
                error: err.to_string(),
            });
        }
        Ok(listed)
    }

    async fn within_deadline<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| DomainError::Timeout(self.timeout))?
    }

    async fn invalidate_orders(&self, user_id: UserId) {
        let key = orders_prefix(user_id);
        match self.order_cache.invalidate_user(user_id).await {
            Ok(_) => self.observer.observe(LifecycleEvent::CacheInvalidated { key }),
            Err(err) => self.observer.observe(LifecycleEvent::CacheInvalidationFailed {
                key,
                error: err.to_string(),
            }),
        }
    }

    async fn invalidate_product(&self, line: &OrderLine) {
        let key = product_key(line.product_id);
        match self.product_cache.invalidate(line.product_id).await {
            Ok(()) => self.observer.observe(LifecycleEvent::CacheInvalidated { key }),
            Err(err) => self.observer.observe(LifecycleEvent::CacheInvalidationFailed {
                key,
                error: err.to_string(),
            }),
        }
    }
}
