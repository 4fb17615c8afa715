//! Event propagation for the fulfillment core.
//!
//! The producer side publishes an [`common::OrderCreatedEvent`] after an
//! order commits. The consumer side subscribes to the same topic and
//! re-applies the stock decrement for every line item, with bounded retry
//! around subscription setup and around each item.

pub mod bus;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod nats;
pub mod publisher;
pub mod retry;
pub mod state;

pub use bus::{Delivery, DeliveryStream, MessageBus, SharedBus};
pub use consumer::{ConsumerSettings, DeliveryReport, ItemOutcome, ItemReport, StockConsumer};
pub use error::{MessagingError, Result};
pub use memory::{DEFAULT_HISTORY_LIMIT, InMemoryBus};
pub use nats::{DEFAULT_QUEUE_GROUP, NatsBus};
pub use publisher::OrderEventPublisher;
pub use retry::{Backoff, Retried, RetryExhausted, RetryPolicy};
pub use state::MessageState;
