//! # eventlink
//!
//! `eventlink` is the asynchronous event-publishing and broker-connection
//! layer between a transactional request path and a STOMP message broker
//! such as ActiveMQ.
//!
//! Publishing never blocks the caller: events are enqueued and delivered by a
//! background sender with bounded retries. Subscriptions run as supervised
//! background workers that resubscribe after the session drops. Repeated
//! failures open a process-wide circuit breaker that stops all further
//! connection attempts until restart.
//!
//! ## Core Modules
//!
//! - `broker`: the connection manager, circuit breaker and envelope types.
//! - `client`: outbound queue, sender and subscription workers, inbound
//!   dispatcher, book events and the `EventBus` root.
//! - `config`: loading and merging configuration.
//! - `transport`: STOMP frame codec and the TCP/WebSocket session.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

pub use broker::{CircuitState, ConnectionManager, ConnectionState};
pub use client::{BookEvent, EventBus, EventPublisher, MessageHandler, TransactionType};
pub use utils::BrokerError;
