//! Event bus
//!
//! The composition root for the broker layer. `EventBus` owns the connection
//! manager, the outbound queue and the background workers, and is the only
//! thing request handlers need to hold.
//!
//! - `publish_event`/`publish` enqueue and return immediately; they never fail
//!   for the caller, even when the broker circuit is disabled.
//! - `subscribe` spawns one subscription worker per call and fails fast with
//!   `CircuitOpen` once the circuit is disabled.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{
    CircuitState, ConnectionManager, ConnectionState, OutboundEnvelope, SubscriptionSpec,
};
use crate::client::dispatcher::{Dispatcher, MessageHandler};
use crate::client::event::{BOOK_PURCHASES_DESTINATION, BookEvent, TransactionType};
use crate::client::sender::{OutboundQueue, RetryPolicy, SenderStats, SenderWorker, StatsSnapshot};
use crate::client::subscriber::SubscriptionWorker;
use crate::config::Settings;
use crate::transport::StompConnector;
use crate::utils::BrokerError;

#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Destination for `publish_event`.
    pub destination: String,
    pub send_policy: RetryPolicy,
    pub resubscribe_policy: RetryPolicy,
    pub prefetch: u32,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            destination: BOOK_PURCHASES_DESTINATION.to_string(),
            send_policy: RetryPolicy::new(3, Duration::from_secs(2)),
            resubscribe_policy: RetryPolicy::new(3, Duration::from_secs(5)),
            prefetch: 10,
        }
    }
}

impl From<&Settings> for BusOptions {
    fn from(settings: &Settings) -> Self {
        let delivery = &settings.delivery;
        Self {
            destination: delivery.destination.clone(),
            send_policy: RetryPolicy::new(
                delivery.max_attempts,
                Duration::from_millis(delivery.send_retry_delay_ms),
            ),
            resubscribe_policy: RetryPolicy::new(
                delivery.max_attempts,
                Duration::from_millis(delivery.resubscribe_delay_ms),
            ),
            prefetch: delivery.prefetch,
        }
    }
}

/// Cloneable publishing handle for request handlers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    queue: OutboundQueue,
    destination: String,
}

impl EventPublisher {
    pub fn publish_event(
        &self,
        user_id: impl Into<String>,
        book_id: i64,
        transaction_type: TransactionType,
    ) {
        let event = BookEvent::new(user_id, book_id, transaction_type);
        self.publish(&self.destination, &event);
    }

    /// Serialize `payload` as JSON and enqueue it for `destination`.
    pub fn publish<T: Serialize>(&self, destination: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(body) => self.publish_envelope(OutboundEnvelope::new(destination, body)),
            Err(e) => error!("Failed to serialize message for {destination}: {e}"),
        }
    }

    pub fn publish_envelope(&self, envelope: OutboundEnvelope) {
        self.queue.push(envelope);
    }
}

pub struct EventBus {
    manager: Arc<ConnectionManager>,
    publisher: EventPublisher,
    sender: JoinHandle<()>,
    stop_sender: oneshot::Sender<()>,
    stats: Arc<SenderStats>,
    subscriptions: std::sync::Mutex<Vec<JoinHandle<()>>>,
    options: BusOptions,
}

impl EventBus {
    /// Start the sender worker. Must be called inside a tokio runtime.
    pub fn start(manager: Arc<ConnectionManager>, options: BusOptions) -> Self {
        let (queue, rx) = OutboundQueue::new();
        let mut worker = SenderWorker::new(manager.clone(), rx, options.send_policy);
        let stop_sender = worker.shutdown_signal();
        let stats = worker.stats();
        let sender = worker.spawn();

        Self {
            manager,
            publisher: EventPublisher {
                queue,
                destination: options.destination.clone(),
            },
            sender,
            stop_sender,
            stats,
            subscriptions: std::sync::Mutex::new(Vec::new()),
            options,
        }
    }

    /// Build a STOMP-backed bus from configuration.
    pub fn from_settings(settings: &Settings) -> Result<Self, BrokerError> {
        let endpoint = settings.endpoint()?;
        info!("Using broker endpoint {endpoint:?}");
        let manager = Arc::new(ConnectionManager::new(
            endpoint,
            Arc::new(StompConnector::new()),
        ));
        Ok(Self::start(manager, BusOptions::from(settings)))
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn publish_event(
        &self,
        user_id: impl Into<String>,
        book_id: i64,
        transaction_type: TransactionType,
    ) {
        self.publisher
            .publish_event(user_id, book_id, transaction_type);
    }

    pub fn publish<T: Serialize>(&self, destination: &str, payload: &T) {
        self.publisher.publish(destination, payload);
    }

    /// Subscribe `handler` to `destination` with the configured prefetch.
    pub fn subscribe<H>(&self, destination: &str, handler: H) -> Result<SubscriptionSpec, BrokerError>
    where
        H: MessageHandler + 'static,
    {
        let spec = SubscriptionSpec::new(destination, self.options.prefetch);
        self.subscribe_spec(spec.clone(), Some(Arc::new(handler)))?;
        Ok(spec)
    }

    /// Start a worker for `spec`. Without a handler messages are only logged
    /// and acknowledged.
    pub fn subscribe_spec(
        &self,
        spec: SubscriptionSpec,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<(), BrokerError> {
        if self.manager.is_disabled() {
            return Err(BrokerError::CircuitOpen);
        }
        let dispatcher = Arc::new(Dispatcher::new(&spec, handler, &self.manager));
        let worker = SubscriptionWorker::new(
            self.manager.clone(),
            spec,
            dispatcher,
            self.options.resubscribe_policy,
        );
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker.spawn());
        Ok(())
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.manager.circuit_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting publishes, give the sender `grace` to drain what is
    /// queued, stop the subscription workers and close the session. Anything
    /// still queued after `grace` is lost. Publisher clones held elsewhere
    /// stay usable but their events are dropped with a warning.
    pub async fn shutdown(self, grace: Duration) {
        let EventBus {
            manager,
            publisher,
            mut sender,
            stop_sender,
            subscriptions,
            ..
        } = self;

        drop(publisher);
        let _ = stop_sender.send(());
        for task in subscriptions
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            task.abort();
        }

        match tokio::time::timeout(grace, &mut sender).await {
            Ok(_) => info!("Outbound queue drained"),
            Err(_) => {
                warn!("Outbound queue not drained within {grace:?}, abandoning pending messages");
                sender.abort();
            }
        }

        manager.disconnect().await;
    }
}
