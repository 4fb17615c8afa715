//! Order orchestration.
//!
//! This module contains:
//! - Request types and validation (`CreateOrderRequest` → `ValidatedOrder`)
//! - The stock policy deciding which path decrements stock
//! - `OrderService`, which reserves stock and writes orders in one unit of work

mod policy;
mod request;
mod service;

pub use policy::{StockPolicy, UnknownStockPolicy};
pub use request::{
    CreateOrderRequest, OrderLine, OrderLineRequest, ValidatedOrder, parse_order_id,
    parse_user_id, validate_page,
};
pub use service::{OrderService, PlacedOrder};

use common::{OrderId, OrderStatus, UnknownStatus};
use thiserror::Error;

/// Errors raised while validating order input.
///
/// All of these are detected before the ledger is touched, except
/// `OrderOwnedByAnotherUser`, `OrderNotPending` and `NonPositiveTotal`, which
/// abort the unit of work they are found in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// User ID is required.
    #[error("User ID is required")]
    UserIdRequired,

    /// User ID is not a well-formed identifier.
    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    /// Order ID is not a well-formed identifier.
    #[error("Invalid order ID: {0}")]
    InvalidOrderId(String),

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// A line item is missing its product ID.
    #[error("Item {index}: product ID is required")]
    ProductIdRequired { index: usize },

    /// A line item's product ID is not a well-formed identifier.
    #[error("Item {index}: invalid product ID: {value}")]
    InvalidProductId { index: usize, value: String },

    /// Invalid quantity.
    #[error("Item {index}: invalid quantity {quantity} (must be greater than 0)")]
    InvalidQuantity { index: usize, quantity: i64 },

    /// Page or page size below one.
    #[error("Invalid page {page} with page size {page_size} (both must be at least 1)")]
    InvalidPage { page: i64, page_size: i64 },

    /// The order id already belongs to a different user.
    #[error("Order {order_id} belongs to another user")]
    OrderOwnedByAnotherUser { order_id: OrderId },

    /// Items can only be merged into a pending order.
    #[error("Order {order_id} is {status}; items can only be added while pending")]
    OrderNotPending {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The computed total was zero.
    #[error("Order total must be greater than zero")]
    NonPositiveTotal,

    /// The status string is not recognized.
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),
}
