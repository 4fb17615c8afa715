use common::{OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the stock or order ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A decrement would drive stock below zero. Nothing was written.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// The ledger could not be reached or refused the operation.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into the data model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true for failures that may succeed if the operation is retried.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // serialization_failure / deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
