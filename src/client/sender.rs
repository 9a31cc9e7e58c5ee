//! Outbound queue and sender worker
//!
//! Publishers push envelopes onto an unbounded FIFO and return immediately.
//! A single sender worker drains it in order, making up to
//! `RetryPolicy::max_attempts` delivery attempts per envelope with a fixed
//! delay between them. When every attempt fails the broker circuit is
//! disabled and the envelope is dropped; envelopes dequeued while the circuit
//! is disabled are dropped with a warning.
//!
//! The worker stops when every producer handle is dropped, or when its
//! shutdown signal fires. After the signal the queue is closed to new
//! envelopes and whatever is already queued is still delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{ConnectionManager, OutboundEnvelope};
use crate::utils::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Producer handle for the outbound FIFO. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundEnvelope>,
}

impl OutboundQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue without blocking. Only fails silently once the worker is gone.
    pub fn push(&self, envelope: OutboundEnvelope) {
        if let Err(rejected) = self.tx.send(envelope) {
            warn!(
                "Sender worker stopped, dropping message for {}",
                rejected.0.destination
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct SenderStats {
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub failed_attempts: u64,
    pub dropped: u64,
}

impl SenderStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct SenderWorker {
    manager: Arc<ConnectionManager>,
    queue: mpsc::UnboundedReceiver<OutboundEnvelope>,
    policy: RetryPolicy,
    stats: Arc<SenderStats>,
    shutdown: Option<oneshot::Receiver<()>>,
}

enum Step {
    Deliver(OutboundEnvelope),
    Close,
    Detach,
    Done,
}

impl SenderWorker {
    pub fn new(
        manager: Arc<ConnectionManager>,
        queue: mpsc::UnboundedReceiver<OutboundEnvelope>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            manager,
            queue,
            policy,
            stats: Arc::new(SenderStats::default()),
            shutdown: None,
        }
    }

    /// Sending on the returned handle closes the queue once; dropping it
    /// without sending leaves the worker running until the producers go away.
    pub fn shutdown_signal(&mut self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.shutdown = Some(rx);
        tx
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until it is closed and empty.
    pub async fn run(mut self) {
        info!("Sender worker started");
        loop {
            match self.next_step().await {
                Step::Deliver(envelope) => self.deliver(envelope).await,
                Step::Close => {
                    info!("Shutdown requested, closing outbound queue");
                    self.queue.close();
                    self.shutdown = None;
                }
                Step::Detach => self.shutdown = None,
                Step::Done => break,
            }
        }
        info!("Outbound queue closed, sender worker stopping");
    }

    async fn next_step(&mut self) -> Step {
        let next = match self.shutdown.as_mut() {
            Some(signal) => tokio::select! {
                biased;
                fired = signal => return if fired.is_ok() { Step::Close } else { Step::Detach },
                envelope = self.queue.recv() => envelope,
            },
            None => self.queue.recv().await,
        };
        next.map_or(Step::Done, Step::Deliver)
    }

    async fn deliver(&self, envelope: OutboundEnvelope) {
        if self.manager.is_disabled() {
            self.drop_disabled(&envelope);
            return;
        }

        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            match self.manager.send(&envelope).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    info!(
                        destination = %envelope.destination,
                        attempt,
                        "Delivered message"
                    );
                    return;
                }
                Err(BrokerError::CircuitOpen) => {
                    self.drop_disabled(&envelope);
                    return;
                }
                Err(e) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Delivery attempt {attempt}/{max} to {} failed: {e}",
                        envelope.destination
                    );
                    if attempt < max {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            "Giving up on message for {} after {max} attempts",
            envelope.destination
        );
        self.manager.disable().await;
    }

    fn drop_disabled(&self, envelope: &OutboundEnvelope) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Broker circuit is open, dropping message for {} created at {}",
            envelope.destination, envelope.created_at
        );
    }
}
