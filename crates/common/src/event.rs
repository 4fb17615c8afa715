//! Wire payload announcing a committed order.

use serde::{Deserialize, Serialize};

use crate::{Money, Order, OrderId, OrderStatus, ProductId, UserId};

/// Topic the order-created event is published on.
pub const ORDER_CREATED_TOPIC: &str = "order.created";

/// Snapshot of an order published after its unit of work commits.
///
/// The payload is history: consumers must not re-validate it against current
/// product prices. Unknown fields are ignored on decode so producers can add
/// fields without breaking older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<EventItem>,
    pub status: OrderStatus,
    pub total: Money,
}

/// A line item as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl From<&Order> for OrderCreatedEvent {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            items: order
                .items
                .iter()
                .map(|item| EventItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
            status: order.status,
            total: order.total,
        }
    }
}
