//! Integration tests for the order-created event path.
//!
//! Orders are created through `OrderService`, published with
//! `OrderEventPublisher` on the in-memory bus and consumed by `StockConsumer`
//! over the same in-memory ledger.

use std::sync::Arc;

use bytes::Bytes;
use cache::InMemoryCacheStore;
use common::{Money, ORDER_CREATED_TOPIC, Order, OrderCreatedEvent, OrderId, Product, UserId};
use domain::{CreateOrderRequest, InventoryService, OrderService, StockPolicy};
use events::{
    Backoff, ConsumerSettings, Delivery, InMemoryBus, ItemOutcome, MessageState, MessagingError,
    OrderEventPublisher, RetryPolicy, StockConsumer,
};
use ledger::{InMemoryLedger, OrderLedger, StockLedger};

type Consumer = StockConsumer<InventoryService<InMemoryLedger>, InMemoryBus>;

struct Harness {
    ledger: InMemoryLedger,
    bus: InMemoryBus,
    orders: OrderService<InMemoryLedger>,
    publisher: OrderEventPublisher<InMemoryBus>,
    consumer: Consumer,
}

fn harness(policy: StockPolicy, item_attempts: u32) -> Harness {
    let ledger = InMemoryLedger::new();
    let cache = Arc::new(InMemoryCacheStore::new());
    let bus = InMemoryBus::new();

    let orders = OrderService::new(ledger.clone(), cache.clone()).with_policy(policy);
    let inventory = InventoryService::new(ledger.clone(), cache);
    let consumer = StockConsumer::new(inventory, bus.clone()).with_settings(ConsumerSettings {
        subscribe_retry: RetryPolicy::new(5, Backoff::None),
        item_retry: RetryPolicy::new(item_attempts, Backoff::None),
        policy,
        ..ConsumerSettings::default()
    });

    Harness {
        publisher: OrderEventPublisher::new(bus.clone()),
        ledger,
        bus,
        orders,
        consumer,
    }
}

async fn seed(ledger: &InMemoryLedger, stock: i64) -> Product {
    let product = Product::new("Widget", "tools", stock, Money::from_cents(500));
    ledger.insert_product(product.clone()).await;
    product
}

fn delivery(order: &Order) -> Delivery {
    event_delivery(&OrderCreatedEvent::from(order))
}

fn event_delivery(event: &OrderCreatedEvent) -> Delivery {
    Delivery {
        topic: ORDER_CREATED_TOPIC.to_string(),
        payload: Bytes::from(serde_json::to_vec(event).unwrap()),
    }
}

mod redelivery {
    use super::*;

    #[tokio::test]
    async fn every_delivery_adjusts_every_item_again() {
        let h = harness(StockPolicy::Both, 3);
        let a = seed(&h.ledger, 100).await;
        let b = seed(&h.ledger, 100).await;
        let order = h
            .orders
            .create_order(
                CreateOrderRequest::new(UserId::new().to_string())
                    .with_item(a.id.to_string(), 2)
                    .with_item(b.id.to_string(), 3),
            )
            .await
            .unwrap();

        let message = delivery(&order);
        let deliveries = 2;
        for _ in 0..deliveries {
            let report = h.consumer.handle_delivery(&message).await;
            assert_eq!(report.state, MessageState::Handled);
            assert_eq!(report.applied(), 2);
        }

        assert_eq!(h.ledger.adjust_calls(), deliveries * order.items.len() as u64);
        assert_eq!(h.ledger.get_product(a.id).await.unwrap().stock, 100 - 2 - 2 * 2);
        assert_eq!(h.ledger.get_product(b.id).await.unwrap().stock, 100 - 3 - 2 * 3);
    }
}

mod retry_bound {
    use super::*;

    #[tokio::test]
    async fn failing_item_is_attempted_exactly_n_times() {
        for attempts in [1, 3, 5] {
            let h = harness(StockPolicy::Both, attempts);
            let product = seed(&h.ledger, 10).await;
            h.ledger.set_fail_next_adjustments(u32::MAX);

            let mut order = Order::new(OrderId::new(), UserId::new());
            order.merge_item(product.id, 1);

            let report = h.consumer.handle_delivery(&delivery(&order)).await;

            assert_eq!(h.ledger.adjust_calls(), u64::from(attempts));
            assert!(matches!(
                report.items[0].outcome,
                ItemOutcome::Failed { attempts: a, .. } if a == attempts
            ));
            assert_eq!(report.state, MessageState::Handled);
        }
    }

    #[tokio::test]
    async fn exhausted_item_does_not_block_next_item() {
        let h = harness(StockPolicy::Both, 3);
        let first = seed(&h.ledger, 10).await;
        let second = seed(&h.ledger, 10).await;
        h.ledger.set_fail_next_adjustments(3);

        let mut order = Order::new(OrderId::new(), UserId::new());
        order.merge_item(first.id, 1);
        order.merge_item(second.id, 1);

        let report = h.consumer.handle_delivery(&delivery(&order)).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.applied(), 1);
        assert_eq!(h.ledger.adjust_calls(), 4);
        assert_eq!(h.ledger.get_product(first.id).await.unwrap().stock, 10);
        assert_eq!(h.ledger.get_product(second.id).await.unwrap().stock, 9);
    }
}

mod policies {
    use super::*;

    async fn create_and_consume(policy: StockPolicy) -> i64 {
        let h = harness(policy, 3);
        let product = seed(&h.ledger, 10).await;
        let order = h
            .orders
            .create_order(
                CreateOrderRequest::new(UserId::new().to_string())
                    .with_item(product.id.to_string(), 3),
            )
            .await
            .unwrap();

        h.consumer.handle_delivery(&delivery(&order)).await;
        h.ledger.get_product(product.id).await.unwrap().stock
    }

    #[tokio::test]
    async fn both_paths_decrement_twice() {
        assert_eq!(create_and_consume(StockPolicy::Both).await, 4);
    }

    #[tokio::test]
    async fn reservation_only_decrements_once() {
        assert_eq!(create_and_consume(StockPolicy::ReservationOnly).await, 7);
    }

    #[tokio::test]
    async fn event_only_decrements_once() {
        assert_eq!(create_and_consume(StockPolicy::EventOnly).await, 7);
    }

    /// Creates one order in two calls sharing an order id, consuming the
    /// event of each call. Returns the stock consumed and the units held.
    async fn reuse_order_id_and_consume(policy: StockPolicy) -> (i64, u32) {
        let h = harness(policy, 3);
        let product = seed(&h.ledger, 10).await;
        let user_id = UserId::new();
        let order_id = OrderId::new();

        for quantity in [2, 1] {
            let placed = h
                .orders
                .place_order(
                    CreateOrderRequest::new(user_id.to_string())
                        .with_order_id(order_id.to_string())
                        .with_item(product.id.to_string(), quantity),
                )
                .await
                .unwrap();
            h.consumer.handle_delivery(&event_delivery(&placed.event())).await;
        }

        let order = h.ledger.get_order(order_id).await.unwrap();
        let held = order.items.iter().map(|item| item.quantity).sum();
        let stock = h.ledger.get_product(product.id).await.unwrap().stock;
        (10 - stock, held)
    }

    #[tokio::test]
    async fn reused_order_id_consumes_the_same_under_single_path_policies() {
        let (reservation_only, held) =
            reuse_order_id_and_consume(StockPolicy::ReservationOnly).await;
        let (event_only, _) = reuse_order_id_and_consume(StockPolicy::EventOnly).await;
        let (both, _) = reuse_order_id_and_consume(StockPolicy::Both).await;

        assert_eq!(held, 3);
        assert_eq!(reservation_only, 3);
        assert_eq!(event_only, 3);
        assert_eq!(both, 6);
    }
}

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn published_order_is_consumed() {
        let h = harness(StockPolicy::EventOnly, 3);
        let product = seed(&h.ledger, 10).await;
        let stream = h.consumer.subscribe().await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let consumer = h.consumer.clone();
        let running = tokio::spawn(async move {
            consumer
                .consume(stream, async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let order = h
            .orders
            .create_order(
                CreateOrderRequest::new(UserId::new().to_string())
                    .with_item(product.id.to_string(), 4),
            )
            .await
            .unwrap();
        assert_eq!(h.ledger.get_product(product.id).await.unwrap().stock, 10);

        h.publisher.publish_order(&order).await.unwrap();
        while h.ledger.get_product(product.id).await.unwrap().stock == 10 {
            tokio::task::yield_now().await;
        }
        stop_tx.send(()).unwrap();
        running.await.unwrap();

        assert_eq!(h.ledger.get_product(product.id).await.unwrap().stock, 6);
        assert_eq!(h.bus.published().len(), 1);
    }

    #[tokio::test]
    async fn subscription_failure_surfaces_to_caller() {
        let h = harness(StockPolicy::Both, 3);
        h.bus.set_fail_next_subscribes(5);

        let err = h.consumer.run(async {}).await.unwrap_err();
        assert!(matches!(
            err,
            MessagingError::SubscriptionFailed { attempts: 5, .. }
        ));
    }
}
