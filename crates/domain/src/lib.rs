//! Domain layer for the order fulfillment services.
//!
//! This crate provides:
//! - Order request validation and the `OrderError` validation taxonomy
//! - `OrderService`, the order orchestrator (create, get, status update, list)
//! - `InventoryService` for cache-aside product reads and stock adjustments
//! - `StockPolicy`, which decides whether order creation, the stock consumer
//!   or both decrement stock

pub mod error;
pub mod inventory;
pub mod order;

pub use error::{DomainError, Result};
pub use inventory::{InventoryService, StockAdjuster};
pub use order::{
    CreateOrderRequest, OrderError, OrderLine, OrderLineRequest, OrderService, PlacedOrder,
    StockPolicy, UnknownStockPolicy, ValidatedOrder, parse_order_id, parse_user_id, validate_page,
};
