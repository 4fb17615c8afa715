//! In-process message bus.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::bus::{Delivery, DeliveryStream, MessageBus};
use crate::error::{MessagingError, Result};

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>;

/// Number of recent messages kept for [`InMemoryBus::published`] by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 64;

/// Fan-out bus backed by unbounded channels.
///
/// Every subscriber of a topic receives every message published after it
/// subscribed. Only the most recent messages are kept in the published
/// history, up to its limit. Failure injection mirrors the other in-memory
/// doubles.
#[derive(Clone)]
pub struct InMemoryBus {
    subscribers: Arc<Mutex<Subscribers>>,
    published: Arc<Mutex<VecDeque<Delivery>>>,
    history_limit: usize,
    fail_next_subscribes: Arc<AtomicU32>,
    fail_publish: Arc<AtomicBool>,
    subscribe_calls: Arc<AtomicU32>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self {
            subscribers: Arc::default(),
            published: Arc::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            fail_next_subscribes: Arc::default(),
            fail_publish: Arc::default(),
            subscribe_calls: Arc::default(),
        }
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many recent messages the published history keeps.
    ///
    /// Zero disables the history.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Makes the next `count` subscribe calls fail.
    pub fn set_fail_next_subscribes(&self, count: u32) {
        self.fail_next_subscribes.store(count, Ordering::SeqCst);
    }

    /// Makes every publish fail while set.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of subscribe calls seen, including failed ones.
    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// The most recent accepted messages, oldest first.
    pub fn published(&self) -> Vec<Delivery> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Ends every open subscription stream.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MessagingError::Publish {
                topic: topic.to_string(),
                reason: "injected publish failure".to_string(),
            });
        }

        let delivery = Delivery {
            topic: topic.to_string(),
            payload,
        };
        if self.history_limit > 0 {
            let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
            if published.len() == self.history_limit {
                published.pop_front();
            }
            published.push_back(delivery.clone());
        }

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|tx| tx.send(delivery.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .fail_next_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MessagingError::Subscribe {
                topic: topic.to_string(),
                reason: "injected subscribe failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(Box::pin(deliveries))
    }
}
