//! Message bus abstraction.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::Result;

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
}

/// Stream of deliveries for one subscription. Ends when the bus closes it.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Topic-based publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Sends `payload` to every current subscriber of `topic`.
    ///
    /// Success means the transport accepted the message, nothing more.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Registers a subscription on `topic`.
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream>;
}

/// Shared handle to a bus.
pub type SharedBus = Arc<dyn MessageBus>;

#[async_trait]
impl<T: MessageBus + ?Sized> MessageBus for Arc<T> {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        (**self).publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream> {
        (**self).subscribe(topic).await
    }
}
