//! The `transport` module handles the wire side of the broker connection:
//! the STOMP frame codec, the broker endpoint, the session traits and the
//! TCP/WebSocket session implementation.

pub mod endpoint;
pub mod frame;
pub mod session;
pub mod stomp;


pub use endpoint::{BrokerEndpoint, Heartbeat, Scheme};
pub use frame::{Command, Decoded, Frame, FrameDecoder};
pub use session::{Connector, Session, SessionEvents};
pub use stomp::StompConnector;
