//! Stock consumer: re-applies stock decrements for delivered order events.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    LifecycleEvent, NoopObserver, ORDER_CREATED_TOPIC, OrderCreatedEvent, OrderId, ProductId,
    SharedObserver,
};
use domain::{StockAdjuster, StockPolicy};
use futures_util::StreamExt;
use tokio::sync::Semaphore;

use crate::bus::{Delivery, DeliveryStream, MessageBus};
use crate::error::{MessagingError, Result};
use crate::retry::RetryPolicy;
use crate::state::MessageState;

/// Default subscription setup attempts.
pub const DEFAULT_SUBSCRIBE_ATTEMPTS: u32 = 5;
/// Default per-item stock adjustment attempts.
pub const DEFAULT_ITEM_ATTEMPTS: u32 = 3;
/// Default linear backoff step for both retry sites.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(100);
/// Default number of messages handled concurrently.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Tuning for a [`StockConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub subscribe_retry: RetryPolicy,
    pub item_retry: RetryPolicy,
    pub concurrency: usize,
    pub policy: StockPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            topic: ORDER_CREATED_TOPIC.to_string(),
            subscribe_retry: RetryPolicy::linear(DEFAULT_SUBSCRIBE_ATTEMPTS, DEFAULT_BACKOFF_STEP),
            item_retry: RetryPolicy::linear(DEFAULT_ITEM_ATTEMPTS, DEFAULT_BACKOFF_STEP),
            concurrency: DEFAULT_CONCURRENCY,
            policy: StockPolicy::default(),
        }
    }
}

/// What happened to one line item of a delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Applied { attempts: u32 },
    Failed { attempts: u32, error: String },
    /// The stock policy leaves this path without a decrement.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub product_id: ProductId,
    pub quantity: u32,
    pub outcome: ItemOutcome,
}

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub state: MessageState,
    pub order_id: Option<OrderId>,
    pub items: Vec<ItemReport>,
}

impl DeliveryReport {
    fn new() -> Self {
        Self {
            state: MessageState::Received,
            order_id: None,
            items: Vec::new(),
        }
    }

    fn advance(&mut self, next: MessageState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        self.state = next;
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Applied { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

/// Subscribes to order-created events and decrements stock for every line
/// item of each delivery.
///
/// Deliveries are not deduplicated: a redelivered event adjusts stock again.
/// Each item is retried independently; a failed item never stops its
/// siblings, and the message counts as handled once every item was tried.
pub struct StockConsumer<A, B> {
    adjuster: Arc<A>,
    bus: Arc<B>,
    settings: ConsumerSettings,
    observer: SharedObserver,
}

impl<A, B> Clone for StockConsumer<A, B> {
    fn clone(&self) -> Self {
        Self {
            adjuster: Arc::clone(&self.adjuster),
            bus: Arc::clone(&self.bus),
            settings: self.settings.clone(),
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<A, B> StockConsumer<A, B>
where
    A: StockAdjuster + 'static,
    B: MessageBus + 'static,
{
    pub fn new(adjuster: A, bus: B) -> Self {
        Self {
            adjuster: Arc::new(adjuster),
            bus: Arc::new(bus),
            settings: ConsumerSettings::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Registers the subscription, retrying with the subscribe policy.
    ///
    /// Returns `SubscriptionFailed` once every attempt has failed.
    #[tracing::instrument(skip(self), fields(topic = %self.settings.topic))]
    pub async fn subscribe(&self) -> Result<DeliveryStream> {
        let topic = self.settings.topic.as_str();
        let outcome = self
            .settings
            .subscribe_retry
            .run(move |attempt| async move {
                let result = self.bus.subscribe(topic).await;
                if let Err(err) = &result {
                    self.observer
                        .observe(LifecycleEvent::SubscriptionAttemptFailed {
                            topic: topic.to_string(),
                            attempt,
                            error: err.to_string(),
                        });
                }
                result
            })
            .await;

        match outcome {
            Ok(subscribed) => {
                self.observer.observe(LifecycleEvent::Subscribed {
                    topic: topic.to_string(),
                    attempts: subscribed.attempts,
                });
                Ok(subscribed.value)
            }
            Err(exhausted) => Err(MessagingError::SubscriptionFailed {
                topic: topic.to_string(),
                attempts: exhausted.attempts,
                last_error: exhausted.last_error.to_string(),
            }),
        }
    }

    /// Subscribes and handles deliveries until the stream ends or `shutdown`
    /// resolves. In-flight handlers are awaited before returning.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let stream = self.subscribe().await?;
        self.consume(stream, shutdown).await;
        Ok(())
    }

    /// Handles deliveries from an already registered stream.
    pub async fn consume<F>(&self, mut stream: DeliveryStream, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        tokio::pin!(shutdown);

        loop {
            let delivery = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Stock consumer shutting down");
                    break;
                }
                next = stream.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        tracing::info!("Subscription closed");
                        break;
                    }
                },
            };

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let consumer = self.clone();
            tokio::spawn(async move {
                consumer.handle_delivery(&delivery).await;
                drop(permit);
            });
        }

        // Wait for in-flight handlers.
        let _ = permits.acquire_many(concurrency as u32).await;
    }

    /// Handles one delivery and reports the outcome of every line item.
    #[tracing::instrument(skip(self, delivery), fields(topic = %delivery.topic))]
    pub async fn handle_delivery(&self, delivery: &Delivery) -> DeliveryReport {
        let start = Instant::now();
        let mut report = DeliveryReport::new();
        self.observer.observe(LifecycleEvent::MessageReceived {
            topic: delivery.topic.clone(),
        });

        let event: OrderCreatedEvent = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(err) => {
                report.advance(MessageState::PermanentlyFailed);
                self.observer.observe(LifecycleEvent::MessageRejected {
                    topic: delivery.topic.clone(),
                    reason: err.to_string(),
                });
                return report;
            }
        };

        report.advance(MessageState::Processing);
        report.order_id = Some(event.id);

        for item in &event.items {
            let outcome = self.apply_item(event.id, item.product_id, item.quantity).await;
            report.items.push(ItemReport {
                product_id: item.product_id,
                quantity: item.quantity,
                outcome,
            });
        }

        report.advance(MessageState::Handled);
        self.observer.observe(LifecycleEvent::MessageHandled {
            order_id: event.id,
            applied: report.applied(),
            failed: report.failed(),
        });
        metrics::histogram!("consumer_message_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        report
    }

    async fn apply_item(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> ItemOutcome {
        if !self.settings.policy.adjusts_on_event() {
            self.observer.observe(LifecycleEvent::ItemSkipped {
                order_id,
                product_id,
            });
            return ItemOutcome::Skipped;
        }

        let delta = -i64::from(quantity);
        let outcome = self
            .settings
            .item_retry
            .run(move |attempt| async move {
                let result = self.adjuster.adjust_stock(product_id, delta).await;
                if let Err(err) = &result {
                    tracing::warn!(
                        %order_id,
                        %product_id,
                        attempt,
                        error = %err,
                        "Stock adjustment attempt failed"
                    );
                }
                result
            })
            .await;

        match outcome {
            Ok(applied) => {
                self.observer.observe(LifecycleEvent::ItemApplied {
                    order_id,
                    product_id,
                    quantity,
                    attempts: applied.attempts,
                });
                ItemOutcome::Applied {
                    attempts: applied.attempts,
                }
            }
            Err(exhausted) => {
                let error = exhausted.last_error.to_string();
                self.observer.observe(LifecycleEvent::ItemFailed {
                    order_id,
                    product_id,
                    attempts: exhausted.attempts,
                    error: error.clone(),
                });
                ItemOutcome::Failed {
                    attempts: exhausted.attempts,
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cache::InMemoryCacheStore;
    use common::{Money, Order, Product, RecordingObserver, UserId};
    use domain::InventoryService;
    use ledger::{InMemoryLedger, StockLedger};

    use super::*;
    use crate::InMemoryBus;
    use crate::retry::Backoff;

    fn fast_settings(policy: StockPolicy) -> ConsumerSettings {
        ConsumerSettings {
            subscribe_retry: RetryPolicy::new(5, Backoff::None),
            item_retry: RetryPolicy::new(3, Backoff::None),
            policy,
            ..ConsumerSettings::default()
        }
    }

    struct Fixture {
        consumer: StockConsumer<InventoryService<InMemoryLedger>, InMemoryBus>,
        ledger: InMemoryLedger,
        bus: InMemoryBus,
        observer: RecordingObserver,
    }

    fn fixture(policy: StockPolicy) -> Fixture {
        let ledger = InMemoryLedger::new();
        let bus = InMemoryBus::new();
        let observer = RecordingObserver::new();
        let inventory = InventoryService::new(ledger.clone(), Arc::new(InMemoryCacheStore::new()));
        let consumer = StockConsumer::new(inventory, bus.clone())
            .with_settings(fast_settings(policy))
            .with_observer(Arc::new(observer.clone()));
        Fixture {
            consumer,
            ledger,
            bus,
            observer,
        }
    }

    async fn seed(ledger: &InMemoryLedger, stock: i64) -> Product {
        let product = Product::new("Widget", "tools", stock, Money::from_cents(100));
        ledger.insert_product(product.clone()).await;
        product
    }

    fn delivery_for(lines: &[(ProductId, u32)]) -> Delivery {
        let mut order = Order::new(OrderId::new(), UserId::new());
        for (product_id, quantity) in lines {
            order.merge_item(*product_id, *quantity);
        }
        let payload = serde_json::to_vec(&OrderCreatedEvent::from(&order)).unwrap();
        Delivery {
            topic: ORDER_CREATED_TOPIC.to_string(),
            payload: Bytes::from(payload),
        }
    }

    #[tokio::test]
    async fn test_delivery_decrements_every_item() {
        let f = fixture(StockPolicy::Both);
        let a = seed(&f.ledger, 10).await;
        let b = seed(&f.ledger, 10).await;

        let report = f
            .consumer
            .handle_delivery(&delivery_for(&[(a.id, 2), (b.id, 5)]))
            .await;

        assert_eq!(report.state, MessageState::Handled);
        assert_eq!(report.applied(), 2);
        assert_eq!(f.ledger.get_product(a.id).await.unwrap().stock, 8);
        assert_eq!(f.ledger.get_product(b.id).await.unwrap().stock, 5);
        assert_eq!(
            f.observer.names(),
            vec!["message_received", "item_applied", "item_applied", "message_handled"]
        );
    }

    #[tokio::test]
    async fn test_failed_item_does_not_stop_siblings() {
        let f = fixture(StockPolicy::Both);
        let scarce = seed(&f.ledger, 1).await;
        let plenty = seed(&f.ledger, 10).await;

        let report = f
            .consumer
            .handle_delivery(&delivery_for(&[(scarce.id, 3), (plenty.id, 4)]))
            .await;

        assert_eq!(report.state, MessageState::Handled);
        assert!(matches!(
            report.items[0].outcome,
            ItemOutcome::Failed { attempts: 3, .. }
        ));
        assert_eq!(report.items[1].outcome, ItemOutcome::Applied { attempts: 1 });
        assert_eq!(f.ledger.get_product(scarce.id).await.unwrap().stock, 1);
        assert_eq!(f.ledger.get_product(plenty.id).await.unwrap().stock, 6);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_bound() {
        let f = fixture(StockPolicy::Both);
        let product = seed(&f.ledger, 10).await;
        f.ledger.set_fail_next_adjustments(2);

        let report = f
            .consumer
            .handle_delivery(&delivery_for(&[(product.id, 1)]))
            .await;

        assert_eq!(report.items[0].outcome, ItemOutcome::Applied { attempts: 3 });
        assert_eq!(f.ledger.get_product(product.id).await.unwrap().stock, 9);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanently_failed() {
        let f = fixture(StockPolicy::Both);
        let product = seed(&f.ledger, 10).await;

        let report = f
            .consumer
            .handle_delivery(&Delivery {
                topic: ORDER_CREATED_TOPIC.to_string(),
                payload: Bytes::from_static(b"{not json"),
            })
            .await;

        assert_eq!(report.state, MessageState::PermanentlyFailed);
        assert!(report.order_id.is_none());
        assert!(report.items.is_empty());
        assert_eq!(f.ledger.adjust_calls(), 0);
        assert_eq!(f.ledger.get_product(product.id).await.unwrap().stock, 10);
        assert_eq!(f.observer.names(), vec!["message_received", "message_rejected"]);
    }

    #[tokio::test]
    async fn test_reservation_only_policy_skips_adjustment() {
        let f = fixture(StockPolicy::ReservationOnly);
        let product = seed(&f.ledger, 10).await;

        let report = f
            .consumer
            .handle_delivery(&delivery_for(&[(product.id, 4)]))
            .await;

        assert_eq!(report.state, MessageState::Handled);
        assert_eq!(report.skipped(), 1);
        assert_eq!(f.ledger.adjust_calls(), 0);
        assert_eq!(f.ledger.get_product(product.id).await.unwrap().stock, 10);
    }

    #[tokio::test]
    async fn test_subscribe_retries_then_succeeds() {
        let f = fixture(StockPolicy::Both);
        f.bus.set_fail_next_subscribes(4);

        f.consumer.subscribe().await.unwrap();

        assert_eq!(f.bus.subscribe_calls(), 5);
        assert_eq!(f.observer.count("subscription_attempt_failed"), 4);
        assert_eq!(f.observer.count("subscribed"), 1);
    }

    #[tokio::test]
    async fn test_subscribe_gives_up_after_bound() {
        let f = fixture(StockPolicy::Both);
        f.bus.set_fail_next_subscribes(10);

        let err = match f.consumer.subscribe().await {
            Ok(_) => panic!("subscription should fail"),
            Err(err) => err,
        };

        assert!(matches!(
            err,
            MessagingError::SubscriptionFailed { attempts: 5, .. }
        ));
        assert_eq!(f.bus.subscribe_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_subscribe_backoff_is_linear() {
        let f = fixture(StockPolicy::Both);
        let consumer = f.consumer.clone().with_settings(ConsumerSettings::default());
        f.bus.set_fail_next_subscribes(2);
        let start = tokio::time::Instant::now();

        consumer.subscribe().await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(100 + 200));
    }

    #[tokio::test]
    async fn test_run_handles_published_messages_until_shutdown() {
        let f = fixture(StockPolicy::Both);
        let product = seed(&f.ledger, 10).await;
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let consumer = f.consumer.clone();
        let handle = tokio::spawn(async move {
            consumer
                .run(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        while f.bus.subscribe_calls() == 0 {
            tokio::task::yield_now().await;
        }
        let delivery = delivery_for(&[(product.id, 3)]);
        f.bus
            .publish(ORDER_CREATED_TOPIC, delivery.payload)
            .await
            .unwrap();

        while f.observer.count("message_handled") == 0 {
            tokio::task::yield_now().await;
        }
        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.ledger.get_product(product.id).await.unwrap().stock, 7);
    }
}
