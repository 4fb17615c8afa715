use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    LifecycleEvent, Money, NoopObserver, Order, OrderId, OrderPage, OrderStatus, PageRequest,
    Product, ProductId, SharedObserver, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    LedgerError, Result,
    store::{Ledger, OrderLedger, StockLedger, UnitOfWork},
};

const LEDGER_NAME: &str = "memory";

#[derive(Debug, Clone, Default)]
struct LedgerState {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    // insertion order, for newest-first listing
    sequence: HashMap<OrderId, u64>,
    next_sequence: u64,
}

impl LedgerState {
    fn product_mut(&mut self, id: ProductId) -> Result<&mut Product> {
        self.products
            .get_mut(&id)
            .ok_or(LedgerError::ProductNotFound(id))
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_adjustments: AtomicU32,
    failing_begins: AtomicU32,
    fail_order_writes: AtomicBool,
    adjust_calls: AtomicU64,
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory ledger implementation for testing and single-process runs.
///
/// A unit of work holds the whole ledger lock and mutates a staged copy that
/// replaces the live state on commit. Units of work are therefore fully
/// serialized, which is stricter than the row locks the PostgreSQL ledger
/// takes but gives the same observable guarantees.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    faults: Arc<Faults>,
    observer: SharedObserver,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            faults: Arc::default(),
            observer: Arc::new(NoopObserver),
        }
    }
}

impl InMemoryLedger {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports lifecycle events to `observer`.
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Inserts or replaces a product.
    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Makes the next `count` calls to `adjust_stock` fail as unavailable.
    pub fn set_fail_next_adjustments(&self, count: u32) {
        self.faults
            .failing_adjustments
            .store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `begin` fail as unavailable.
    pub fn set_fail_next_begins(&self, count: u32) {
        self.faults.failing_begins.store(count, Ordering::SeqCst);
    }

    /// Makes `write_order` fail inside units of work begun after this call.
    pub fn set_fail_on_order_write(&self, fail: bool) {
        self.faults.fail_order_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns how many times `adjust_stock` has been called, failed calls included.
    pub fn adjust_calls(&self) -> u64 {
        self.faults.adjust_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StockLedger for InMemoryLedger {
    async fn get_product(&self, id: ProductId) -> Result<Product> {
        self.state
            .lock()
            .await
            .products
            .get(&id)
            .cloned()
            .ok_or(LedgerError::ProductNotFound(id))
    }

    async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<Product> {
        self.faults.adjust_calls.fetch_add(1, Ordering::SeqCst);
        if take_fault(&self.faults.failing_adjustments) {
            return Err(LedgerError::Unavailable(
                "injected adjustment failure".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let product = state.product_mut(id)?;
        let next = product.stock.saturating_add(delta);
        if next < 0 {
            let err = LedgerError::InsufficientStock {
                product_id: id,
                requested: delta.saturating_neg(),
                available: product.stock,
            };
            self.observer
                .observe(LifecycleEvent::StockAdjustmentRejected {
                    product_id: id,
                    delta,
                    reason: err.to_string(),
                });
            return Err(err);
        }

        product.stock = next;
        product.updated_at = Utc::now();
        let product = product.clone();
        drop(state);

        self.observer.observe(LifecycleEvent::StockAdjusted {
            product_id: id,
            delta,
            stock: product.stock,
        });
        Ok(product)
    }
}

#[async_trait]
impl OrderLedger for InMemoryLedger {
    async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.state
            .lock()
            .await
            .orders
            .get(&id)
            .cloned()
            .ok_or(LedgerError::OrderNotFound(id))
    }

    async fn list_orders(&self, user_id: UserId, page: PageRequest) -> Result<OrderPage> {
        let state = self.state.lock().await;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .collect();
        orders.sort_by_key(|o| Reverse(state.sequence.get(&o.id).copied().unwrap_or_default()));

        let total = orders.len() as u64;
        let orders = orders
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .cloned()
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        if take_fault(&self.faults.failing_begins) {
            return Err(LedgerError::Unavailable("injected begin failure".to_string()));
        }

        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            staged,
            fail_order_writes: self.faults.fail_order_writes.load(Ordering::SeqCst),
            observer: Arc::clone(&self.observer),
            finished: false,
        }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    fail_order_writes: bool,
    observer: SharedObserver,
    finished: bool,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_product(&mut self, id: ProductId) -> Result<Product> {
        self.staged
            .products
            .get(&id)
            .cloned()
            .ok_or(LedgerError::ProductNotFound(id))
    }

    async fn reserve_stock(&mut self, id: ProductId, quantity: u32) -> Result<Product> {
        let product = self.staged.product_mut(id)?;
        if !product.has_stock(quantity) {
            return Err(LedgerError::InsufficientStock {
                product_id: id,
                requested: quantity as i64,
                available: product.stock,
            });
        }
        product.stock -= quantity as i64;
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn write_order(&mut self, draft: &Order) -> Result<Order> {
        if self.fail_order_writes {
            return Err(LedgerError::Unavailable(
                "injected order write failure".to_string(),
            ));
        }

        let staged = &mut self.staged;
        if !staged.orders.contains_key(&draft.id) {
            let seq = staged.next_sequence;
            staged.next_sequence += 1;
            staged.sequence.insert(draft.id, seq);
            staged.orders.insert(
                draft.id,
                Order {
                    items: Vec::new(),
                    total: Money::zero(),
                    ..draft.clone()
                },
            );
        }

        let order = staged
            .orders
            .get_mut(&draft.id)
            .ok_or(LedgerError::OrderNotFound(draft.id))?;
        order.total += draft.total;
        for item in &draft.items {
            order.merge_item(item.product_id, item.quantity);
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn set_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let order = self
            .staged
            .orders
            .get_mut(&id)
            .ok_or(LedgerError::OrderNotFound(id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        *this.guard = std::mem::take(&mut this.staged);
        this.finished = true;
        this.observer
            .observe(LifecycleEvent::UnitOfWorkCommitted {
                ledger: LEDGER_NAME,
            });
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            self.observer
                .observe(LifecycleEvent::UnitOfWorkRolledBack {
                    ledger: LEDGER_NAME,
                });
        }
    }
}
