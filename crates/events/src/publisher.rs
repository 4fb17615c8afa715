//! Order-created event publishing.

use std::sync::Arc;

use bytes::Bytes;
use common::{
    LifecycleEvent, NoopObserver, ORDER_CREATED_TOPIC, Order, OrderCreatedEvent, SharedObserver,
};
use domain::PlacedOrder;

use crate::bus::MessageBus;
use crate::error::Result;

/// Serializes order snapshots and sends them to the order-created topic.
///
/// There is no retry here: a failed publish is returned to the caller, who
/// decides whether the event is lost.
pub struct OrderEventPublisher<B: MessageBus> {
    bus: B,
    topic: String,
    observer: SharedObserver,
}

impl<B: MessageBus> OrderEventPublisher<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            topic: ORDER_CREATED_TOPIC.to_string(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes one event.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.id))]
    pub async fn publish(&self, event: &OrderCreatedEvent) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(event)?);
        self.bus.publish(&self.topic, payload).await?;

        self.observer.observe(LifecycleEvent::EventPublished {
            topic: self.topic.clone(),
            order_id: event.id,
        });
        Ok(())
    }

    /// Publishes a snapshot of a committed order.
    pub async fn publish_order(&self, order: &Order) -> Result<()> {
        self.publish(&OrderCreatedEvent::from(order)).await
    }

    /// Publishes the lines one creation call applied.
    ///
    /// Use this rather than [`publish_order`](Self::publish_order) after
    /// `OrderService::place_order`, so a reused order id does not announce
    /// earlier items twice.
    pub async fn publish_placed(&self, placed: &PlacedOrder) -> Result<()> {
        self.publish(&placed.event()).await
    }
}
