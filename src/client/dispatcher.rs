//! Inbound dispatcher
//!
//! Runs on the session reader for every MESSAGE routed to its subscription.
//! The handler result never reaches the session: errors and panics are
//! logged, and the message is acknowledged either way (unless the
//! subscription uses `auto` ack). A failed ACK is logged and not retried.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::broker::{AckMode, ConnectionManager, InboundMessage, InboundSink, SubscriptionSpec};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Application callback for one subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        self(message)
    }
}

pub struct Dispatcher {
    destination: String,
    ack_mode: AckMode,
    handler: Option<Arc<dyn MessageHandler>>,
    manager: Weak<ConnectionManager>,
}

impl Dispatcher {
    pub fn new(
        spec: &SubscriptionSpec,
        handler: Option<Arc<dyn MessageHandler>>,
        manager: &Arc<ConnectionManager>,
    ) -> Self {
        Self {
            destination: spec.destination.clone(),
            ack_mode: spec.ack_mode,
            handler,
            manager: Arc::downgrade(manager),
        }
    }

    pub async fn dispatch(&self, message: InboundMessage) {
        info!(
            destination = %self.destination,
            message_id = %message.message_id,
            "Received message"
        );

        if let Some(handler) = &self.handler {
            match AssertUnwindSafe(handler.handle(&message))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => debug!(message_id = %message.message_id, "Message processed"),
                Ok(Err(e)) => error!("Error processing message {}: {e}", message.message_id),
                Err(panic) => error!(
                    "Handler panicked on message {}: {}",
                    message.message_id,
                    panic_text(panic.as_ref())
                ),
            }
        }

        if !self.ack_mode.requires_ack() {
            return;
        }
        let Some(manager) = self.manager.upgrade() else {
            warn!(
                "Connection manager is gone, message {} left unacknowledged",
                message.message_id
            );
            return;
        };
        if let Err(e) = manager.acknowledge(&message).await {
            error!("Failed to acknowledge message {}: {e}", message.message_id);
        }
    }
}

#[async_trait]
impl InboundSink for Dispatcher {
    async fn deliver(&self, message: InboundMessage) {
        self.dispatch(message).await;
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
