use async_trait::async_trait;
use common::{Order, OrderId, OrderPage, OrderStatus, PageRequest, Product, ProductId, UserId};

use crate::Result;

/// Product access with row-level consistency per product.
///
/// The stock ledger is the source of truth for stock; caches in front of it
/// are disposable.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Reads a product by id.
    async fn get_product(&self, id: ProductId) -> Result<Product>;

    /// Applies a signed stock change in its own transaction.
    ///
    /// Positive deltas restock, negative deltas consume. If the result would
    /// be negative the change is not committed and `InsufficientStock` is
    /// returned. Returns the product as committed.
    async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<Product>;
}

/// Order header and item access.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Reads an order with its items.
    async fn get_order(&self, id: OrderId) -> Result<Order>;

    /// Lists a user's orders, newest first.
    async fn list_orders(&self, user_id: UserId, page: PageRequest) -> Result<OrderPage>;
}

/// A ledger that can open units of work spanning both products and orders.
#[async_trait]
pub trait Ledger: StockLedger + OrderLedger {
    /// Begins a unit of work.
    ///
    /// The returned handle owns the transaction. Dropping it without calling
    /// [`UnitOfWork::commit`] rolls every change back, so early returns,
    /// panics and cancelled futures never leave partial effects.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A bounded sequence of ledger operations that commit or roll back together.
///
/// Rows read through a unit of work stay locked until it ends, so two units
/// of work competing for the same product are serialized.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Reads a product and holds its row lock.
    async fn lock_product(&mut self, id: ProductId) -> Result<Product>;

    /// Decrements a product's stock by `quantity`.
    ///
    /// Fails with `InsufficientStock` (leaving the row unchanged) if fewer
    /// than `quantity` units are on hand. Returns the product after the
    /// decrement.
    async fn reserve_stock(&mut self, id: ProductId, quantity: u32) -> Result<Product>;

    /// Reads an order and holds its row lock. Returns `None` if it doesn't exist.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Writes an order header and its items.
    ///
    /// A missing header is inserted as given. An existing header keeps its
    /// user, status and creation time; `draft.total` is added to its total.
    /// Each draft item is inserted, or merged into an existing item for the
    /// same product by increasing its quantity. Returns the stored order.
    async fn write_order(&mut self, draft: &Order) -> Result<Order>;

    /// Sets the status of an existing order and returns it.
    async fn set_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order>;

    /// Makes every change visible to other readers.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every change.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
