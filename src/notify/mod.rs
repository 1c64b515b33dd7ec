//! Change notification subsystem.
//!
//! # Data Flow
//! ```text
//! Route mutation (routes::service):
//!     → ChangeNotifier::notify_changed
//!         → local RouteEvent::Reload (this instance, immediately)
//!         → background publish "refresh" on the RefreshBus (retried with backoff)
//!
//! Every instance:
//!     RefreshListener (subscribed to the bus, resubscribes with backoff)
//!     → local RouteEvent::Reload
//!     → routing::RouteTableReloader rebuilds the table from the route cache
//! ```
//!
//! # Design Decisions
//! - Messages carry no content; a receiver always reloads the full table
//! - Publishing never fails the admin call that triggered it
//! - Lost messages are repaired by periodic reconciliation, not by the bus
//! - The originating instance may reload twice (local event + bus echo);
//!   reloads are idempotent

pub mod bus;
pub mod listener;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::resilience::{BackoffPolicy, Elapsed};

pub use bus::{LocalRefreshBus, RedisRefreshBus, RefreshBus, REFRESH_PAYLOAD};
pub use listener::RefreshListener;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Timeout(#[from] Elapsed),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// In-process signal that the route table must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    Reload,
}

/// Tells this instance and every other instance that routes changed.
#[derive(Clone)]
pub struct ChangeNotifier {
    bus: Arc<dyn RefreshBus>,
    local: broadcast::Sender<RouteEvent>,
    policy: BackoffPolicy,
}

impl ChangeNotifier {
    pub fn new(bus: Arc<dyn RefreshBus>, policy: BackoffPolicy) -> Self {
        let (local, _) = broadcast::channel(16);
        Self { bus, local, policy }
    }

    pub fn bus(&self) -> Arc<dyn RefreshBus> {
        self.bus.clone()
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn subscribe_local(&self) -> broadcast::Receiver<RouteEvent> {
        self.local.subscribe()
    }

    /// Sender for components that raise local events (the bus listener).
    pub fn local_sender(&self) -> broadcast::Sender<RouteEvent> {
        self.local.clone()
    }

    /// Reload this instance only.
    pub fn notify_local(&self) {
        // No receivers means no table to reload yet.
        let _ = self.local.send(RouteEvent::Reload);
    }

    /// Reload this instance now and publish to the cluster in the background.
    pub fn notify_changed(&self) {
        self.notify_local();
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.publish_with_retry().await {
                tracing::error!(error = %e, "Route refresh broadcast failed");
            }
        });
    }

    /// Publish the refresh message, retrying with backoff. Returns the number
    /// of attempts it took.
    pub async fn publish_with_retry(&self) -> Result<u32, NotifyError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.bus.publish(REFRESH_PAYLOAD).await {
                Ok(()) => return Ok(attempt),
                Err(e) => match self.policy.delay_after(attempt) {
                    Some(delay) => {
                        tracing::warn!(attempt, delay = ?delay, error = %e, "Refresh publish failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        metrics::record_broadcast_failure();
                        return Err(NotifyError::Exhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                },
            }
        }
    }
}
