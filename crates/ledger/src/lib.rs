//! Stock and order ledgers.
//!
//! The ledger is the source of truth for stock and orders. Multi-step
//! changes go through a [`UnitOfWork`] obtained from [`Ledger::begin`].

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use store::{Ledger, OrderLedger, StockLedger, UnitOfWork};
