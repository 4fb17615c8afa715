//! NATS-backed message bus.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::bus::{Delivery, DeliveryStream, MessageBus};
use crate::error::{MessagingError, Result};

/// Queue group shared by every stock consumer instance, so each message is
/// handled by one instance.
pub const DEFAULT_QUEUE_GROUP: &str = "stock-consumer";

/// Core NATS publish/subscribe.
///
/// Subscriptions are not durable: messages published while no consumer is
/// connected are not redelivered.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    queue_group: Option<String>,
}

impl NatsBus {
    /// Connects to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        tracing::info!(%url, "Connected to NATS");
        Ok(Self::new(client))
    }

    pub fn new(client: async_nats::Client) -> Self {
        Self {
            client,
            queue_group: None,
        }
    }

    /// Subscribes through a queue group instead of a plain subscription.
    pub fn with_queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let publish_error = |reason: String| MessagingError::Publish {
            topic: topic.to_string(),
            reason,
        };

        self.client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| publish_error(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| publish_error(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream> {
        let subscribe_error = |reason: String| MessagingError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        let subscriber = match &self.queue_group {
            Some(group) => self
                .client
                .queue_subscribe(topic.to_string(), group.clone())
                .await
                .map_err(|e| subscribe_error(e.to_string()))?,
            None => self
                .client
                .subscribe(topic.to_string())
                .await
                .map_err(|e| subscribe_error(e.to_string()))?,
        };

        let deliveries = subscriber.map(|message| Delivery {
            topic: message.subject.to_string(),
            payload: message.payload,
        });
        Ok(Box::pin(deliveries))
    }
}
