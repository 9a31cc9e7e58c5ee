//! Subscription worker
//!
//! One worker per subscription. It subscribes, then waits until the session
//! carrying the subscription is gone (state leaves `Connected`, or a newer
//! session generation appears), backs off and subscribes again. The
//! dispatcher registration is reused across resubscribes.
//!
//! Consecutive failed subscribe attempts are bounded by the retry policy;
//! running out disables the broker circuit and ends the worker. A successful
//! subscribe resets the count.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{ConnectionManager, ConnectionState, SubscriptionSpec};
use crate::client::dispatcher::Dispatcher;
use crate::client::sender::RetryPolicy;
use crate::utils::BrokerError;

pub struct SubscriptionWorker {
    manager: Arc<ConnectionManager>,
    spec: SubscriptionSpec,
    dispatcher: Arc<Dispatcher>,
    policy: RetryPolicy,
}

impl SubscriptionWorker {
    pub fn new(
        manager: Arc<ConnectionManager>,
        spec: SubscriptionSpec,
        dispatcher: Arc<Dispatcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            manager,
            spec,
            dispatcher,
            policy,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let destination = self.spec.destination.clone();
        let mut status = self.manager.watch_status();
        let mut failures = 0u32;

        loop {
            if self.manager.is_disabled() {
                warn!("Broker circuit is open, subscription to {destination} stopped");
                return;
            }

            match self
                .manager
                .subscribe(&self.spec, self.dispatcher.clone())
                .await
            {
                Ok(generation) => {
                    failures = 0;
                    let manager_gone = status
                        .wait_for(|s| {
                            s.generation != generation || s.state != ConnectionState::Connected
                        })
                        .await
                        .is_err();
                    if manager_gone {
                        return;
                    }
                    warn!(
                        "Lost broker session for {destination}, resubscribing in {:?}",
                        self.policy.delay
                    );
                }
                Err(BrokerError::CircuitOpen) => {
                    warn!("Broker circuit is open, subscription to {destination} stopped");
                    return;
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        "Subscription error for {destination} (attempt {failures}/{}): {e}",
                        self.policy.max_attempts
                    );
                    if failures >= self.policy.max_attempts {
                        self.manager.disable().await;
                        return;
                    }
                }
            }

            tokio::time::sleep(self.policy.delay).await;
            info!("Resubscribing to {destination}");
        }
    }
}
