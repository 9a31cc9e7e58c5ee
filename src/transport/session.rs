//! Session seam between the connection manager and the wire.
//!
//! A `Connector` opens one physical session; the session reports inbound
//! traffic and its own loss through `SessionEvents`. The connection manager
//! only ever talks to these traits, which keeps the retry and circuit logic
//! testable without a broker.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::message::InboundMessage;
use crate::transport::endpoint::BrokerEndpoint;
use crate::transport::frame::Frame;
use crate::utils::BrokerError;

/// One live physical session to the broker.
#[async_trait]
pub trait Session: Send + Sync {
    /// Write one frame. Single attempt, no reconnect.
    async fn transmit(&self, frame: Frame) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    /// Graceful close. Calling it on a dead session is a no-op.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Callbacks fired by a session's reader, in wire order.
#[async_trait]
pub trait SessionEvents: Send + Sync {
    async fn on_message(&self, message: InboundMessage);

    /// The broker sent an ERROR frame.
    fn on_error(&self, message: &str);

    /// The session is gone (EOF, transport error, missed heart-beats or close).
    fn on_disconnected(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session and complete the protocol handshake.
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn Session>, BrokerError>;
}
