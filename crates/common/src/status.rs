//! Order status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an order after it has been committed.
///
/// Status transitions:
/// ```text
/// Pending ──► Confirmed ──► Shipped ──► Delivered
///    │            │            │
///    └────────────┴────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Stock has been reserved and the order is awaiting downstream processing.
    #[default]
    Pending,

    /// Payment or manual confirmation has been recorded.
    Confirmed,

    /// The order has left the warehouse.
    Shipped,

    /// The order has been delivered (terminal state).
    Delivered,

    /// The order was cancelled (terminal state).
    Cancelled,
}

/// Returned when a string does not name a known status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Confirmed => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns true if an order in this status can move to `next`.
    ///
    /// Progress is forward-only; cancellation is allowed from any
    /// non-terminal status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            OrderStatus::Cancelled => true,
            _ => next.rank() > self.rank(),
        }
    }

    /// Returns the status name as stored and sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}
