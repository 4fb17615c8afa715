//! Shared types for the order fulfillment services.

mod event;
mod model;
mod money;
pub mod observe;
mod status;
mod types;

pub use event::{EventItem, ORDER_CREATED_TOPIC, OrderCreatedEvent};
pub use model::{Order, OrderItem, OrderPage, PageRequest, Product};
pub use money::Money;
pub use observe::{
    LifecycleEvent, NoopObserver, Observer, RecordingObserver, SharedObserver, TracingObserver,
};
pub use status::{OrderStatus, UnknownStatus};
pub use types::{OrderId, ProductId, UserId};
