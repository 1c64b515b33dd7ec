//! Bus subscription that turns cluster messages into local reload events.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::notify::{ChangeNotifier, RefreshBus, RouteEvent};
use crate::resilience::BackoffPolicy;

pub struct RefreshListener {
    bus: Arc<dyn RefreshBus>,
    events: broadcast::Sender<RouteEvent>,
    policy: BackoffPolicy,
}

impl RefreshListener {
    pub fn new(notifier: &ChangeNotifier) -> Self {
        Self {
            bus: notifier.bus(),
            events: notifier.local_sender(),
            policy: notifier.policy(),
        }
    }

    /// Runs until shutdown, or until subscribing fails `max_attempts` times in
    /// a row. A lost subscription is re-established under the same policy.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut failures = 0u32;
        loop {
            let subscribed = tokio::select! {
                result = self.bus.subscribe() => result,
                _ = shutdown.recv() => return,
            };

            match subscribed {
                Ok(mut messages) => {
                    failures = 0;
                    loop {
                        tokio::select! {
                            message = messages.next() => match message {
                                Some(()) => {
                                    tracing::debug!("Refresh message received");
                                    let _ = self.events.send(RouteEvent::Reload);
                                }
                                None => {
                                    tracing::warn!("Refresh subscription lost, resubscribing");
                                    break;
                                }
                            },
                            _ = shutdown.recv() => return,
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    match self.policy.delay_after(failures) {
                        Some(delay) => {
                            tracing::warn!(attempt = failures, delay = ?delay, error = %e, "Refresh subscribe failed, retrying");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.recv() => return,
                            }
                        }
                        None => {
                            tracing::error!(
                                attempts = failures,
                                error = %e,
                                "Giving up on refresh subscription; relying on periodic reconciliation"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{LocalRefreshBus, NotifyError, REFRESH_PAYLOAD};
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Unreachable {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RefreshBus for Unreachable {
        async fn publish(&self, _payload: &str) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn subscribe(&self) -> Result<BoxStream<'static, ()>, NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Exhausted {
                attempts: 0,
                last: "connection refused".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_bus_message_becomes_local_event() {
        let bus = Arc::new(LocalRefreshBus::new());
        let notifier = ChangeNotifier::new(bus.clone(), BackoffPolicy::new(3, 1, 5));
        let mut events = notifier.subscribe_local();
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let task = tokio::spawn(RefreshListener::new(&notifier).run(stop_rx));
        // Give the listener time to subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(REFRESH_PAYLOAD).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await;
        assert_eq!(event.unwrap().unwrap(), RouteEvent::Reload);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let bus = Arc::new(Unreachable {
            attempts: AtomicU32::new(0),
        });
        let notifier = ChangeNotifier::new(bus.clone(), BackoffPolicy::new(3, 1, 5));
        let (_stop_tx, stop_rx) = broadcast::channel(1);

        tokio::time::timeout(Duration::from_secs(2), RefreshListener::new(&notifier).run(stop_rx))
            .await
            .unwrap();
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 3);
    }
}
