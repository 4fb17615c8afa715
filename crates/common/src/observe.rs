//! Observability port.
//!
//! Services and ledgers receive an [`Observer`] at construction and report
//! lifecycle points through it instead of logging to a process-wide sink.
//! [`TracingObserver`] is the production implementation; it forwards every
//! event to `tracing` and bumps the matching `metrics` counter.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{Money, OrderId, OrderStatus, ProductId, UserId};

/// A structured lifecycle point emitted by the fulfillment core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    ReservationStarted {
        order_id: OrderId,
        user_id: UserId,
        line_items: usize,
    },
    StockReserved {
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        remaining: i64,
    },
    ReservationCommitted {
        order_id: OrderId,
        user_id: UserId,
        total: Money,
    },
    ReservationAborted {
        order_id: OrderId,
        reason: String,
    },
    UnitOfWorkCommitted {
        ledger: &'static str,
    },
    UnitOfWorkRolledBack {
        ledger: &'static str,
    },
    StockAdjusted {
        product_id: ProductId,
        delta: i64,
        stock: i64,
    },
    StockAdjustmentRejected {
        product_id: ProductId,
        delta: i64,
        reason: String,
    },
    StatusUpdated {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    CachePopulateFailed {
        key: String,
        error: String,
    },
    CacheInvalidated {
        key: String,
    },
    CacheInvalidationFailed {
        key: String,
        error: String,
    },
    EventPublished {
        topic: String,
        order_id: OrderId,
    },
    SubscriptionAttemptFailed {
        topic: String,
        attempt: u32,
        error: String,
    },
    Subscribed {
        topic: String,
        attempts: u32,
    },
    MessageReceived {
        topic: String,
    },
    MessageRejected {
        topic: String,
        reason: String,
    },
    ItemApplied {
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        attempts: u32,
    },
    ItemFailed {
        order_id: OrderId,
        product_id: ProductId,
        attempts: u32,
        error: String,
    },
    ItemSkipped {
        order_id: OrderId,
        product_id: ProductId,
    },
    MessageHandled {
        order_id: OrderId,
        applied: usize,
        failed: usize,
    },
}

impl LifecycleEvent {
    /// Stable snake_case name, used as the log message and in tests.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ReservationStarted { .. } => "reservation_started",
            LifecycleEvent::StockReserved { .. } => "stock_reserved",
            LifecycleEvent::ReservationCommitted { .. } => "reservation_committed",
            LifecycleEvent::ReservationAborted { .. } => "reservation_aborted",
            LifecycleEvent::UnitOfWorkCommitted { .. } => "unit_of_work_committed",
            LifecycleEvent::UnitOfWorkRolledBack { .. } => "unit_of_work_rolled_back",
            LifecycleEvent::StockAdjusted { .. } => "stock_adjusted",
            LifecycleEvent::StockAdjustmentRejected { .. } => "stock_adjustment_rejected",
            LifecycleEvent::StatusUpdated { .. } => "status_updated",
            LifecycleEvent::CacheHit { .. } => "cache_hit",
            LifecycleEvent::CacheMiss { .. } => "cache_miss",
            LifecycleEvent::CachePopulateFailed { .. } => "cache_populate_failed",
            LifecycleEvent::CacheInvalidated { .. } => "cache_invalidated",
            LifecycleEvent::CacheInvalidationFailed { .. } => "cache_invalidation_failed",
            LifecycleEvent::EventPublished { .. } => "event_published",
            LifecycleEvent::SubscriptionAttemptFailed { .. } => "subscription_attempt_failed",
            LifecycleEvent::Subscribed { .. } => "subscribed",
            LifecycleEvent::MessageReceived { .. } => "message_received",
            LifecycleEvent::MessageRejected { .. } => "message_rejected",
            LifecycleEvent::ItemApplied { .. } => "item_applied",
            LifecycleEvent::ItemFailed { .. } => "item_failed",
            LifecycleEvent::ItemSkipped { .. } => "item_skipped",
            LifecycleEvent::MessageHandled { .. } => "message_handled",
        }
    }
}

/// Receives lifecycle events. Implementations must be cheap and non-blocking.
pub trait Observer: Send + Sync {
    fn observe(&self, event: LifecycleEvent);
}

/// Shared handle passed to services.
pub type SharedObserver = Arc<dyn Observer>;

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn observe(&self, _event: LifecycleEvent) {}
}

/// Forwards events to `tracing` and `metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn shared() -> SharedObserver {
        Arc::new(Self)
    }
}

impl Observer for TracingObserver {
    fn observe(&self, event: LifecycleEvent) {
        let name = event.name();
        match event {
            LifecycleEvent::ReservationStarted {
                order_id,
                user_id,
                line_items,
            } => {
                tracing::debug!(%order_id, %user_id, line_items, "{name}");
            }
            LifecycleEvent::StockReserved {
                order_id,
                product_id,
                quantity,
                remaining,
            } => {
                tracing::debug!(%order_id, %product_id, quantity, remaining, "{name}");
            }
            LifecycleEvent::ReservationCommitted {
                order_id,
                user_id,
                total,
            } => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(%order_id, %user_id, %total, "{name}");
            }
            LifecycleEvent::ReservationAborted { order_id, reason } => {
                metrics::counter!("reservations_aborted_total").increment(1);
                tracing::warn!(%order_id, %reason, "{name}");
            }
            LifecycleEvent::UnitOfWorkCommitted { ledger } => {
                tracing::trace!(ledger, "{name}");
            }
            LifecycleEvent::UnitOfWorkRolledBack { ledger } => {
                metrics::counter!("unit_of_work_rollbacks_total").increment(1);
                tracing::debug!(ledger, "{name}");
            }
            LifecycleEvent::StockAdjusted {
                product_id,
                delta,
                stock,
            } => {
                metrics::counter!("stock_adjustments_total").increment(1);
                tracing::info!(%product_id, delta, stock, "{name}");
            }
            LifecycleEvent::StockAdjustmentRejected {
                product_id,
                delta,
                reason,
            } => {
                metrics::counter!("stock_adjustments_rejected_total").increment(1);
                tracing::warn!(%product_id, delta, %reason, "{name}");
            }
            LifecycleEvent::StatusUpdated { order_id, from, to } => {
                tracing::info!(%order_id, %from, %to, "{name}");
            }
            LifecycleEvent::CacheHit { key } => {
                metrics::counter!("cache_hits_total").increment(1);
                tracing::trace!(%key, "{name}");
            }
            LifecycleEvent::CacheMiss { key } => {
                metrics::counter!("cache_misses_total").increment(1);
                tracing::trace!(%key, "{name}");
            }
            LifecycleEvent::CachePopulateFailed { key, error } => {
                tracing::warn!(%key, %error, "{name}");
            }
            LifecycleEvent::CacheInvalidated { key } => {
                tracing::debug!(%key, "{name}");
            }
            LifecycleEvent::CacheInvalidationFailed { key, error } => {
                metrics::counter!("cache_invalidation_failures_total").increment(1);
                tracing::warn!(%key, %error, "{name}");
            }
            LifecycleEvent::EventPublished { topic, order_id } => {
                metrics::counter!("events_published_total").increment(1);
                tracing::info!(%topic, %order_id, "{name}");
            }
            LifecycleEvent::SubscriptionAttemptFailed {
                topic,
                attempt,
                error,
            } => {
                tracing::error!(%topic, attempt, %error, "{name}");
            }
            LifecycleEvent::Subscribed { topic, attempts } => {
                tracing::info!(%topic, attempts, "{name}");
            }
            LifecycleEvent::MessageReceived { topic } => {
                metrics::counter!("consumer_messages_total").increment(1);
                tracing::debug!(%topic, "{name}");
            }
            LifecycleEvent::MessageRejected { topic, reason } => {
                metrics::counter!("consumer_messages_rejected_total").increment(1);
                tracing::error!(%topic, %reason, "{name}");
            }
            LifecycleEvent::ItemApplied {
                order_id,
                product_id,
                quantity,
                attempts,
            } => {
                tracing::info!(%order_id, %product_id, quantity, attempts, "{name}");
            }
            LifecycleEvent::ItemFailed {
                order_id,
                product_id,
                attempts,
                error,
            } => {
                metrics::counter!("consumer_items_failed_total").increment(1);
                tracing::error!(%order_id, %product_id, attempts, %error, "{name}");
            }
            LifecycleEvent::ItemSkipped {
                order_id,
                product_id,
            } => {
                tracing::debug!(%order_id, %product_id, "{name}");
            }
            LifecycleEvent::MessageHandled {
                order_id,
                applied,
                failed,
            } => {
                tracing::info!(%order_id, applied, failed, "{name}");
            }
        }
    }
}

/// Collects events in memory so tests can assert on lifecycle order.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event observed so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the names of every event observed so far, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(LifecycleEvent::name).collect()
    }

    /// Returns how many events with the given name were observed.
    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
