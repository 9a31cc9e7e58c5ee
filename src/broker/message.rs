//! Message definitions for the broker layer
//!
//! - `OutboundEnvelope`: one pending publish, created by a publisher and
//!   discarded by the sender worker after a terminal outcome
//! - `SubscriptionSpec`: one standing subscription, created at startup
//! - `InboundMessage`: one delivered MESSAGE frame, discarded after dispatch

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::transport::frame::{Command, Frame};
use crate::utils::{BrokerError, FrameError};

#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub destination: String,
    pub body: String,
    pub persistent: bool,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl OutboundEnvelope {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
            persistent: true,
            content_type: "application/json".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(Command::Send)
            .header("destination", self.destination.as_str())
            .header("persistent", self.persistent.to_string())
            .header("content-type", self.content_type.as_str())
            .with_body(self.body.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers a message consumed once sent; no ACK frames.
    Auto,
    /// An ACK covers the message and everything delivered before it.
    Client,
    /// Each message is acknowledged on its own.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    pub fn requires_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Subscriber identifier, sent as the SUBSCRIBE `id` header.
    pub id: String,
    pub destination: String,
    pub ack_mode: AckMode,
    /// Upper bound on unacknowledged in-flight messages.
    pub prefetch: u32,
}

impl SubscriptionSpec {
    pub fn new(destination: impl Into<String>, prefetch: u32) -> Self {
        Self {
            id: format!("sub-{}", Uuid::new_v4()),
            destination: destination.into(),
            ack_mode: AckMode::ClientIndividual,
            prefetch,
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(Command::Subscribe)
            .header("id", self.id.as_str())
            .header("destination", self.destination.as_str())
            .header("ack", self.ack_mode.as_str())
            .header("activemq.prefetchSize", self.prefetch.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub destination: String,
    pub subscription: String,
    pub message_id: String,
    /// Delivery tag used in the ACK frame.
    pub ack_id: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub received_at: DateTime<Utc>,
    /// Generation of the session that delivered the message. Set by the
    /// connection manager on arrival; 0 until then.
    pub generation: u64,
}

impl InboundMessage {
    pub fn from_frame(frame: Frame) -> Result<Self, BrokerError> {
        let required = |name: &str| {
            frame
                .get(name)
                .map(str::to_string)
                .ok_or_else(|| FrameError::MissingHeader(name.to_string()))
        };
        let destination = required("destination")?;
        let message_id = required("message-id")?;
        let subscription = frame.get("subscription").unwrap_or_default().to_string();
        let ack_id = frame.get("ack").unwrap_or(message_id.as_str()).to_string();
        let body = String::from_utf8_lossy(&frame.body).into_owned();

        Ok(Self {
            destination,
            subscription,
            message_id,
            ack_id,
            body,
            headers: frame.headers,
            received_at: Utc::now(),
            generation: 0,
        })
    }

    /// Decode the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn ack_frame(&self) -> Frame {
        Frame::new(Command::Ack).header("id", self.ack_id.as_str())
    }
}
