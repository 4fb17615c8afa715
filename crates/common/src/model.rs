//! Persisted data model shared by the ledgers, caches and services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, OrderId, OrderStatus, ProductId, UserId};

/// A product row in the stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    /// Units on hand. Never negative after a committed mutation.
    pub stock: i64,
    /// Current unit price.
    pub price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a new product with a generated id.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        stock: i64,
        price: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProductId::new(),
            name: name.into(),
            category: category.into(),
            stock,
            price,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if at least `quantity` units are on hand.
    pub fn has_stock(&self, quantity: u32) -> bool {
        self.stock >= quantity as i64
    }
}

/// A line of an order. Identity is `(order_id, product_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderItem {
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
        }
    }
}

/// An order header together with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    /// Sum of `quantity * unit price` captured when the items were reserved.
    pub total: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an empty pending order.
    pub fn new(id: OrderId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            items: Vec::new(),
            status: OrderStatus::Pending,
            total: Money::zero(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the item for `product_id`, if present.
    pub fn item(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Adds `quantity` of `product_id`, increasing an existing line instead of
    /// duplicating it.
    pub fn merge_item(&mut self, product_id: ProductId, quantity: u32) {
        match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(existing) => existing.quantity += quantity,
            None => self
                .items
                .push(OrderItem::new(self.id, product_id, quantity)),
        }
    }

    /// Total number of units across all items.
    pub fn unit_count(&self) -> u64 {
        self.items.iter().map(|i| i.quantity as u64).sum()
    }
}

/// One-based pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.page_size as u64
    }
}

/// A page of a user's orders, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    /// Number of orders the user has across all pages.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
