//! The `client` module is the application-facing side of the broker layer.
//!
//! It provides the outbound queue and sender worker, the subscription worker
//! and inbound dispatcher, the book event payload, and `EventBus`, which wires
//! them to a `ConnectionManager`.

pub mod bus;
pub mod dispatcher;
pub mod event;
pub mod sender;
pub mod subscriber;

pub use bus::{BusOptions, EventBus, EventPublisher};
pub use dispatcher::{Dispatcher, HandlerError, MessageHandler};
pub use event::{
    BOOK_PURCHASE_EVENT, BOOK_PURCHASES_DESTINATION, BookEvent, BookPurchaseLogger,
    TransactionType,
};
pub use sender::{OutboundQueue, RetryPolicy, SenderStats, SenderWorker, StatsSnapshot};
pub use subscriber::SubscriptionWorker;
