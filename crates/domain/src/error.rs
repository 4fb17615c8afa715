//! Domain error types.

use std::time::Duration;

use common::{OrderStatus, ProductId};
use ledger::LedgerError;
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
///
/// Each variant is a distinct outcome the caller can act on; the HTTP layer
/// maps them to status codes without looking at messages.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The request was malformed. Never retried.
    #[error("Validation error: {0}")]
    Validation(#[from] OrderError),

    /// A referenced product or order does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A line item asked for more units than are on hand.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// The order cannot move from its current status to the requested one.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// The ledger failed for a reason unrelated to the request.
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[source] LedgerError),

    /// The unit of work did not finish before its deadline and was rolled back.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl DomainError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DomainError::Infrastructure(err) => err.is_transient(),
            DomainError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<LedgerError> for DomainError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ProductNotFound(id) => DomainError::NotFound {
                entity: "product",
                id: id.to_string(),
            },
            LedgerError::OrderNotFound(id) => DomainError::NotFound {
                entity: "order",
                id: id.to_string(),
            },
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => DomainError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => DomainError::Infrastructure(other),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
