use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which path decrements stock for a committed order.
///
/// Order creation reserves stock synchronously and the stock consumer
/// decrements it again when the order-created event is delivered. `Both`
/// keeps that double adjustment; the other two variants switch one path off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockPolicy {
    /// Only order creation decrements stock; the consumer acknowledges
    /// events without adjusting.
    ReservationOnly,

    /// Order creation checks availability under lock without decrementing;
    /// the consumer performs the only decrement.
    EventOnly,

    /// Both paths decrement.
    #[default]
    Both,
}

/// Returned when a string does not name a known policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stock policy: {0} (expected reservation-only, event-only or both)")]
pub struct UnknownStockPolicy(pub String);

impl StockPolicy {
    /// Returns true if order creation decrements stock.
    pub fn reserves_on_create(&self) -> bool {
        !matches!(self, StockPolicy::EventOnly)
    }

    /// Returns true if the consumer decrements stock on delivery.
    pub fn adjusts_on_event(&self) -> bool {
        !matches!(self, StockPolicy::ReservationOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockPolicy::ReservationOnly => "reservation-only",
            StockPolicy::EventOnly => "event-only",
            StockPolicy::Both => "both",
        }
    }
}

impl std::fmt::Display for StockPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StockPolicy {
    type Err = UnknownStockPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "reservation-only" => Ok(StockPolicy::ReservationOnly),
            "event-only" => Ok(StockPolicy::EventOnly),
            "both" => Ok(StockPolicy::Both),
            _ => Err(UnknownStockPolicy(s.to_string())),
        }
    }
}
