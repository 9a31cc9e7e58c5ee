//! Connection manager
//!
//! Owns the single physical broker session. Every connect/send/subscribe
//! runs under one async operation lock, so at most one session is ever being
//! established or used for these operations at a time. ACKs bypass that lock
//! and go straight to the session that delivered the message; they are
//! dropped if that session is gone. They are issued from the session's
//! own reader and must not wait behind an operation that is itself waiting on
//! that reader (a DISCONNECT receipt, for example).
//!
//! Connection state is published on a `watch` channel together with a
//! generation number that increases with every new physical session, so a
//! subscription can tell whether the session carrying it is still the live one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::broker::circuit::{CircuitBreaker, CircuitState};
use crate::broker::message::{InboundMessage, OutboundEnvelope, SubscriptionSpec};
use crate::transport::endpoint::BrokerEndpoint;
use crate::transport::session::{Connector, Session, SessionEvents};
use crate::utils::BrokerError;

pub type SessionGeneration = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub generation: SessionGeneration,
}

/// Receiver of messages for one subscription.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(&self, message: InboundMessage);
}

struct Shared {
    routes: std::sync::Mutex<HashMap<String, Arc<dyn InboundSink>>>,
    status: watch::Sender<SessionStatus>,
}

pub struct ConnectionManager {
    endpoint: BrokerEndpoint,
    connector: Arc<dyn Connector>,
    circuit: CircuitBreaker,
    op_lock: Mutex<()>,
    session: std::sync::Mutex<Option<(Arc<dyn Session>, SessionGeneration)>>,
    generation: AtomicU64,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(endpoint: BrokerEndpoint, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            state: ConnectionState::Disconnected,
            generation: 0,
        });
        Self {
            endpoint,
            connector,
            circuit: CircuitBreaker::new(),
            op_lock: Mutex::new(()),
            session: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            shared: Arc::new(Shared {
                routes: std::sync::Mutex::new(HashMap::new()),
                status,
            }),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn is_disabled(&self) -> bool {
        self.circuit.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Establish a session unless a live one exists. Idempotent while connected.
    pub async fn connect(&self) -> Result<SessionGeneration, BrokerError> {
        if self.circuit.is_open() {
            return Err(BrokerError::CircuitOpen);
        }
        let _guard = self.op_lock.lock().await;
        self.ensure_session().await.map(|(_, generation)| generation)
    }

    /// Close the live session, if any. Never fails.
    pub async fn disconnect(&self) {
        let _guard = self.op_lock.lock().await;
        self.close_current().await;
    }

    /// One delivery attempt. Retry policy belongs to the caller.
    pub async fn send(&self, envelope: &OutboundEnvelope) -> Result<(), BrokerError> {
        if self.circuit.is_open() {
            return Err(BrokerError::CircuitOpen);
        }
        let _guard = self.op_lock.lock().await;
        let (session, _) = self.ensure_session().await?;

        match session.transmit(envelope.to_frame()).await {
            Ok(()) => {
                debug!(destination = %envelope.destination, "Sent message");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send message to {}: {e}", envelope.destination);
                self.close_current().await;
                Err(BrokerError::Send {
                    destination: envelope.destination.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Register `sink` for the subscription and issue SUBSCRIBE on the live
    /// session. The registration outlives the session, so a resubscribe with
    /// the same spec keeps delivering to the same sink.
    pub async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
        sink: Arc<dyn InboundSink>,
    ) -> Result<SessionGeneration, BrokerError> {
        if self.circuit.is_open() {
            return Err(BrokerError::CircuitOpen);
        }
        let _guard = self.op_lock.lock().await;
        let (session, generation) = self.ensure_session().await?;

        self.shared
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.id.clone(), sink);

        match session.transmit(spec.to_frame()).await {
            Ok(()) => {
                info!("Subscribed to {} as {}", spec.destination, spec.id);
                Ok(generation)
            }
            Err(e) => {
                error!("Failed to subscribe to {}: {e}", spec.destination);
                self.close_current().await;
                Err(BrokerError::Subscribe {
                    destination: spec.destination.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// ACK one message on the session it arrived on. Never opens a session;
    /// if that session has been replaced the ACK is not sent and
    /// `NotConnected` is returned, since ack ids are only valid on the
    /// session that issued them.
    pub async fn acknowledge(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let session = self
            .current()
            .filter(|(s, generation)| *generation == message.generation && s.is_connected())
            .map(|(s, _)| s)
            .ok_or(BrokerError::NotConnected)?;
        session.transmit(message.ack_frame()).await
    }

    /// Open the circuit and drop the session. Irreversible.
    pub async fn disable(&self) {
        if self.circuit.trip() {
            error!(
                "Disabling broker connection to {}; a restart is required to re-enable it",
                self.endpoint
            );
        }
        self.disconnect().await;
    }

    fn current(&self) -> Option<(Arc<dyn Session>, SessionGeneration)> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_current(
        &self,
        session: Option<(Arc<dyn Session>, SessionGeneration)>,
    ) -> Option<(Arc<dyn Session>, SessionGeneration)> {
        std::mem::replace(
            &mut *self.session.lock().unwrap_or_else(PoisonError::into_inner),
            session,
        )
    }

    /// Caller must hold `op_lock`.
    async fn ensure_session(&self) -> Result<(Arc<dyn Session>, SessionGeneration), BrokerError> {
        if self.circuit.is_open() {
            return Err(BrokerError::CircuitOpen);
        }
        if let Some(live) = self.current().filter(|(s, _)| s.is_connected()) {
            return Ok(live);
        }
        if let Some((stale, _)) = self.replace_current(None) {
            let _ = stale.close().await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.status.send_replace(SessionStatus {
            state: ConnectionState::Connecting,
            generation,
        });

        let events = Arc::new(SessionSink {
            generation,
            shared: self.shared.clone(),
        });
        let attempt = tokio::time::timeout(
            self.endpoint.connect_timeout,
            self.connector.connect(&self.endpoint, events),
        )
        .await;

        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Connection {
                endpoint: self.endpoint.to_string(),
                reason: format!("timed out after {:?}", self.endpoint.connect_timeout),
            }),
        };

        match result {
            Ok(session) => {
                self.replace_current(Some((session.clone(), generation)));
                // The session may already have dropped; its sink then wins.
                self.shared.status.send_modify(|status| {
                    if status.generation == generation && session.is_connected() {
                        status.state = ConnectionState::Connected;
                    }
                });
                info!("Connected to broker at {}", self.endpoint);
                Ok((session, generation))
            }
            Err(e) => {
                self.shared.status.send_replace(SessionStatus {
                    state: ConnectionState::Disconnected,
                    generation,
                });
                error!("Failed to connect to broker: {e}");
                Err(e)
            }
        }
    }

    /// Caller must hold `op_lock`.
    async fn close_current(&self) {
        if let Some((session, _)) = self.replace_current(None) {
            if session.is_connected() {
                match session.close().await {
                    Ok(()) => info!("Disconnected from broker"),
                    Err(e) => warn!("Error while closing broker session: {e}"),
                }
            }
        }
        self.shared.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
        });
    }
}

/// Event sink handed to one physical session.
struct SessionSink {
    generation: SessionGeneration,
    shared: Arc<Shared>,
}

#[async_trait]
impl SessionEvents for SessionSink {
    async fn on_message(&self, mut message: InboundMessage) {
        message.generation = self.generation;
        let sink = self
            .shared
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.subscription)
            .cloned();
        match sink {
            Some(sink) => sink.deliver(message).await,
            None => warn!(
                "Dropping message {} for unknown subscription `{}`",
                message.message_id, message.subscription
            ),
        }
    }

    fn on_error(&self, message: &str) {
        error!("Broker error: {message}");
    }

    fn on_disconnected(&self) {
        let generation = self.generation;
        let changed = self.shared.status.send_if_modified(|status| {
            if status.generation == generation && status.state != ConnectionState::Disconnected {
                status.state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            warn!("Disconnected from broker");
        }
    }
}
