//! The `broker` module is the broker-facing side of the crate: the connection
//! manager that owns the single session, the process-wide circuit breaker and
//! the envelope types that flow through them.

pub mod circuit;
pub mod connection;
pub mod message;

pub use circuit::{CircuitBreaker, CircuitState};
pub use connection::{
    ConnectionManager, ConnectionState, InboundSink, SessionGeneration, SessionStatus,
};
pub use message::{AckMode, InboundMessage, OutboundEnvelope, SubscriptionSpec};
