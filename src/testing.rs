//! In-memory broker doubles shared by the unit tests.
//!
//! `FakeBroker` is a `Connector` whose sessions record every transmitted
//! frame. Connect and SEND failures can be scripted, inbound MESSAGE frames
//! injected, and the live session dropped as if the socket had died.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::InboundMessage;
use crate::transport::endpoint::BrokerEndpoint;
use crate::transport::frame::{Command, Frame};
use crate::transport::session::{Connector, Session, SessionEvents};
use crate::utils::BrokerError;

#[derive(Default)]
struct FakeState {
    connect_failures: AtomicU32,
    send_failures: AtomicU32,
    hang_connects: AtomicBool,
    connects: AtomicU32,
    frames: Mutex<Vec<Frame>>,
    current: Mutex<Option<(Arc<FakeSession>, Arc<dyn SessionEvents>)>>,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<FakeState>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_connects(&self, n: u32) {
        self.state.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` SEND frames.
    pub fn fail_sends(&self, n: u32) {
        self.state.send_failures.store(n, Ordering::SeqCst);
    }

    pub fn hang_connects(&self, hang: bool) {
        self.state.hang_connects.store(hang, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.state
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Poll until at least `count` frames of `command` were transmitted.
    pub async fn wait_for(&self, command: Command, count: usize) -> Vec<Frame> {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let frames = self.frames(command);
                if frames.len() >= count {
                    return frames;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {count} {command} frame(s)"))
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|(session, _)| session.is_connected())
    }

    /// Push a MESSAGE frame through the live session's reader path.
    pub async fn deliver(&self, subscription: &str, destination: &str, message_id: &str, body: &str) {
        let events = self
            .state
            .current
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, events)| events.clone())
            .expect("no live fake session");
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("message-id", message_id)
            .header("subscription", subscription)
            .header("ack", format!("ack-{message_id}"))
            .with_body(body.as_bytes());
        let message = InboundMessage::from_frame(frame).expect("valid MESSAGE frame");
        events.on_message(message).await;
    }

    /// Mark the live session dead without reporting it, as when a write
    /// fails before the reader has noticed the socket is gone.
    pub fn break_session_silently(&self) {
        if let Some((session, _)) = self.state.current.lock().unwrap().as_ref() {
            session.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Kill the live session as if the socket died.
    pub fn drop_session(&self) {
        let current = self.state.current.lock().unwrap().clone();
        if let Some((session, events)) = current {
            session.connected.store(false, Ordering::SeqCst);
            events.on_disconnected();
        }
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn Session>, BrokerError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_connects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Connection {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let session = Arc::new(FakeSession {
            connected: AtomicBool::new(true),
            state: self.state.clone(),
        });
        *self.state.current.lock().unwrap() = Some((session.clone(), events));
        Ok(session)
    }
}

pub struct FakeSession {
    connected: AtomicBool,
    state: Arc<FakeState>,
}

#[async_trait]
impl Session for FakeSession {
    async fn transmit(&self, frame: Frame) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if frame.command == Command::Send {
            let failing = self
                .state
                .send_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                self.connected.store(false, Ordering::SeqCst);
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
            }
        }
        self.state.frames.lock().unwrap().push(frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Endpoint pointing nowhere, with a short connect timeout.
pub fn test_endpoint() -> BrokerEndpoint {
    let mut endpoint = BrokerEndpoint::new("127.0.0.1", 61613).with_credentials("admin", "admin");
    endpoint.connect_timeout = Duration::from_secs(1);
    endpoint
}
