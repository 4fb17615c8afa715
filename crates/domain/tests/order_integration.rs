//! Integration tests for order creation.
//!
//! These tests drive `OrderService` and `InventoryService` over the in-memory
//! ledger and cache, covering atomicity, stock non-negativity under
//! concurrency, cache coherence and item merging.

use std::sync::Arc;

use cache::{InMemoryCacheStore, orders_key};
use common::{Money, OrderStatus, PageRequest, Product, ProductId, UserId};
use domain::{CreateOrderRequest, DomainError, InventoryService, OrderService};
use ledger::{InMemoryLedger, OrderLedger, StockLedger};

struct Harness {
    orders: OrderService<InMemoryLedger>,
    inventory: InventoryService<InMemoryLedger>,
    ledger: InMemoryLedger,
    cache: InMemoryCacheStore,
}

fn harness() -> Harness {
    let ledger = InMemoryLedger::new();
    let cache = InMemoryCacheStore::new();
    Harness {
        orders: OrderService::new(ledger.clone(), Arc::new(cache.clone())),
        inventory: InventoryService::new(ledger.clone(), Arc::new(cache.clone())),
        ledger,
        cache,
    }
}

async fn seed(ledger: &InMemoryLedger, stock: i64, cents: i64) -> Product {
    let product = Product::new("Widget", "tools", stock, Money::from_cents(cents));
    ledger.insert_product(product.clone()).await;
    product
}

fn order_for(user_id: UserId) -> CreateOrderRequest {
    CreateOrderRequest::new(user_id.to_string())
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn successful_order_reserves_stock_and_totals() {
        let h = harness();
        let p1 = seed(&h.ledger, 5, 1000).await;

        let order = h
            .orders
            .create_order(order_for(UserId::new()).with_item(p1.id.to_string(), 3))
            .await
            .unwrap();

        assert_eq!(h.ledger.get_product(p1.id).await.unwrap().stock, 2);
        assert_eq!(order.total, Money::from_cents(3000));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_everything_unchanged() {
        let h = harness();
        let p1 = seed(&h.ledger, 2, 1000).await;

        let err = h
            .orders
            .create_order(order_for(UserId::new()).with_item(p1.id.to_string(), 5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 5,
                available: 2,
                ..
            }
        ));
        assert_eq!(h.ledger.get_product(p1.id).await.unwrap().stock, 2);
        assert_eq!(h.ledger.order_count().await, 0);
    }

    #[tokio::test]
    async fn missing_product_rolls_back_earlier_lines() {
        let h = harness();
        let p1 = seed(&h.ledger, 5, 1000).await;
        let p2 = ProductId::new();

        let err = h
            .orders
            .create_order(
                order_for(UserId::new())
                    .with_item(p1.id.to_string(), 1)
                    .with_item(p2.to_string(), 1),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::NotFound {
                entity: "product",
                ..
            }
        ));
        assert_eq!(h.ledger.get_product(p1.id).await.unwrap().stock, 5);
        assert_eq!(h.ledger.order_count().await, 0);
    }

    #[tokio::test]
    async fn listing_reflects_new_order_after_cached_read() {
        let h = harness();
        let p1 = seed(&h.ledger, 5, 1000).await;
        let user_a = UserId::new();
        let page = PageRequest::new(1, 10);

        let before = h.orders.list_orders(user_a, page).await.unwrap();
        assert!(before.orders.is_empty());
        assert!(h.cache.contains_key(&orders_key(user_a, page)));

        let order = h
            .orders
            .create_order(order_for(user_a).with_item(p1.id.to_string(), 1))
            .await
            .unwrap();

        let after = h.orders.list_orders(user_a, page).await.unwrap();
        assert_eq!(after.total, 1);
        assert_eq!(after.orders[0].id, order.id);
    }
}

mod atomicity {
    use super::*;

    #[tokio::test]
    async fn one_short_line_aborts_every_line() {
        let h = harness();
        let plenty = seed(&h.ledger, 10, 100).await;
        let scarce = seed(&h.ledger, 1, 100).await;

        let err = h
            .orders
            .create_order(
                order_for(UserId::new())
                    .with_item(plenty.id.to_string(), 4)
                    .with_item(scarce.id.to_string(), 2),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock { .. }));
        assert_eq!(h.ledger.get_product(plenty.id).await.unwrap().stock, 10);
        assert_eq!(h.ledger.get_product(scarce.id).await.unwrap().stock, 1);
        assert_eq!(h.ledger.order_count().await, 0);
    }

    #[tokio::test]
    async fn failed_order_write_rolls_back_reservations() {
        let h = harness();
        let product = seed(&h.ledger, 10, 100).await;
        h.ledger.set_fail_on_order_write(true);

        let err = h
            .orders
            .create_order(order_for(UserId::new()).with_item(product.id.to_string(), 4))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Infrastructure(_)));
        assert!(err.is_transient());
        assert_eq!(h.ledger.get_product(product.id).await.unwrap().stock, 10);
        assert_eq!(h.ledger.order_count().await, 0);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_never_oversell() {
        let h = harness();
        let product = seed(&h.ledger, 5, 1000).await;
        let orders = Arc::new(h.orders);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let orders = Arc::clone(&orders);
            let request = order_for(UserId::new()).with_item(product.id.to_string(), 1);
            handles.push(tokio::spawn(async move { orders.create_order(request).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => assert!(matches!(err, DomainError::InsufficientStock { .. })),
            }
        }

        assert_eq!(succeeded, 5);
        assert_eq!(h.ledger.get_product(product.id).await.unwrap().stock, 0);
        assert_eq!(h.ledger.order_count().await, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reserved_quantity_never_exceeds_initial_stock() {
        let h = harness();
        let product = seed(&h.ledger, 20, 100).await;
        let orders = Arc::new(h.orders);

        let mut handles = Vec::new();
        for quantity in [3, 7, 5, 9, 4, 6, 2, 8] {
            let orders = Arc::clone(&orders);
            let request = order_for(UserId::new()).with_item(product.id.to_string(), quantity);
            handles.push(tokio::spawn(async move {
                orders.create_order(request).await.map(|_| quantity)
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            if let Ok(quantity) = handle.await.unwrap() {
                reserved += quantity;
            }
        }

        let remaining = h.ledger.get_product(product.id).await.unwrap().stock;
        assert!(reserved <= 20);
        assert_eq!(remaining, 20 - reserved);
    }
}

mod cache_coherence {
    use super::*;

    #[tokio::test]
    async fn product_read_after_order_matches_ledger() {
        let h = harness();
        let product = seed(&h.ledger, 5, 1000).await;

        assert_eq!(h.inventory.get_product(product.id).await.unwrap().stock, 5);

        h.orders
            .create_order(order_for(UserId::new()).with_item(product.id.to_string(), 2))
            .await
            .unwrap();

        let through_cache = h.inventory.get_product(product.id).await.unwrap();
        let direct = h.ledger.get_product(product.id).await.unwrap();
        assert_eq!(through_cache, direct);
        assert_eq!(through_cache.stock, 3);
    }

    #[tokio::test]
    async fn status_update_invalidates_listing() {
        let h = harness();
        let product = seed(&h.ledger, 5, 1000).await;
        let user_id = UserId::new();
        let page = PageRequest::new(1, 10);

        let order = h
            .orders
            .create_order(order_for(user_id).with_item(product.id.to_string(), 1))
            .await
            .unwrap();
        let listed = h.orders.list_orders(user_id, page).await.unwrap();
        assert_eq!(listed.orders[0].status, OrderStatus::Pending);

        h.orders
            .update_order_status(order.id, OrderStatus::Confirmed)
            .await
            .unwrap();

        let listed = h.orders.list_orders(user_id, page).await.unwrap();
        assert_eq!(listed.orders[0].status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn losing_the_cache_changes_nothing() {
        let h = harness();
        let product = seed(&h.ledger, 5, 1000).await;
        let user_id = UserId::new();
        h.cache.set_unavailable(true);

        let order = h
            .orders
            .create_order(order_for(user_id).with_item(product.id.to_string(), 1))
            .await
            .unwrap();

        let listed = h
            .orders
            .list_orders(user_id, PageRequest::new(1, 10))
            .await
            .unwrap();
        assert_eq!(listed.orders[0].id, order.id);
        assert_eq!(h.inventory.get_product(product.id).await.unwrap().stock, 4);
    }
}

mod merge {
    use super::*;

    #[tokio::test]
    async fn reusing_order_id_merges_items() {
        let h = harness();
        let first = seed(&h.ledger, 10, 1000).await;
        let second = seed(&h.ledger, 10, 250).await;
        let user_id = UserId::new();

        let order = h
            .orders
            .create_order(order_for(user_id).with_item(first.id.to_string(), 2))
            .await
            .unwrap();

        let merged = h
            .orders
            .create_order(
                order_for(user_id)
                    .with_order_id(order.id.to_string())
                    .with_item(first.id.to_string(), 1)
                    .with_item(second.id.to_string(), 4),
            )
            .await
            .unwrap();

        assert_eq!(merged.id, order.id);
        assert_eq!(merged.items.len(), 2);
        assert_eq!(merged.item(first.id).unwrap().quantity, 3);
        assert_eq!(merged.item(second.id).unwrap().quantity, 4);
        assert_eq!(merged.total, Money::from_cents(2000 + 1000 + 1000));
        assert_eq!(h.ledger.order_count().await, 1);
        assert_eq!(h.ledger.get_product(first.id).await.unwrap().stock, 7);
    }
}

mod totals {
    use super::*;

    #[tokio::test]
    async fn total_is_fixed_at_creation_price() {
        let h = harness();
        let product = seed(&h.ledger, 10, 1000).await;

        let order = h
            .orders
            .create_order(order_for(UserId::new()).with_item(product.id.to_string(), 2))
            .await
            .unwrap();

        let mut repriced = h.ledger.get_product(product.id).await.unwrap();
        repriced.price = Money::from_cents(9999);
        h.ledger.insert_product(repriced).await;

        let stored = h.ledger.get_order(order.id).await.unwrap();
        assert_eq!(stored.total, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn multi_line_total_sums_each_line() {
        let h = harness();
        let a = seed(&h.ledger, 10, 1050).await;
        let b = seed(&h.ledger, 10, 299).await;

        let order = h
            .orders
            .create_order(
                order_for(UserId::new())
                    .with_item(a.id.to_string(), 2)
                    .with_item(b.id.to_string(), 3),
            )
            .await
            .unwrap();

        assert_eq!(order.total.cents(), 2 * 1050 + 3 * 299);
    }
}
