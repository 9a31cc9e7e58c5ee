//! Error types for the broker layer.
//!
//! Transport-level failures (`Connection`, `Send`, `Subscribe`) are retried by
//! the worker that owns the operation. `CircuitOpen` is returned once the
//! broker circuit has been disabled and is never retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport or handshake failure while opening a session.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Transmit failure on an established session.
    #[error("send to {destination} failed: {reason}")]
    Send { destination: String, reason: String },

    #[error("subscribe to {destination} failed: {reason}")]
    Subscribe { destination: String, reason: String },

    /// The circuit breaker is open; no connection attempts are made.
    #[error("broker circuit is open, connections are disabled")]
    CircuitOpen,

    #[error("no live broker session")]
    NotConnected,

    /// The broker rejected the CONNECT with an ERROR frame.
    #[error("broker error: {0}")]
    Remote(String),

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid broker url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("header line without ':' separator: `{0}`")]
    MissingSeparator(String),

    #[error("missing `{0}` header")]
    MissingHeader(String),

    #[error("invalid escape sequence `\\{0}` in header")]
    InvalidEscape(char),

    #[error("invalid content-length `{0}`")]
    InvalidContentLength(String),

    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("frame body not terminated by NUL")]
    MissingNul,

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}
