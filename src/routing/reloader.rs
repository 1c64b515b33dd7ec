//! Rebuilds the live route table whenever a reload event arrives.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::notify::RouteEvent;
use crate::routes::cache::RouteCache;
use crate::routing::RouteTableHandle;

pub struct RouteTableReloader {
    table: RouteTableHandle,
    cache: Arc<dyn RouteCache>,
}

impl RouteTableReloader {
    pub fn new(table: RouteTableHandle, cache: Arc<dyn RouteCache>) -> Self {
        Self { table, cache }
    }

    /// Reload once now. Errors are logged; the previous table keeps serving.
    pub async fn reload(&self) {
        if let Err(e) = self.table.reload(self.cache.as_ref()).await {
            tracing::error!(error = %e, "Route table reload failed, keeping current table");
        }
    }

    pub async fn run(
        self,
        mut events: broadcast::Receiver<RouteEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(RouteEvent::Reload) => self.reload().await,
                    // Collapsed events still require one reload.
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Reload events collapsed");
                        self.reload().await;
                    }
                    Err(RecvError::Closed) => return,
                },
                _ = shutdown.recv() => {
                    tracing::debug!("Route table reloader stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use crate::routes::cache::MemoryRouteCache;
    use crate::routes::types::RouteDefinition;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reload_on_event() {
        let cache = MemoryRouteCache::new();
        let table = RouteTableHandle::new(Arc::new(CapabilityRegistry::builtin()));
        let (events_tx, events_rx) = broadcast::channel(4);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let task = tokio::spawn(
            RouteTableReloader::new(table.clone(), Arc::new(cache.clone())).run(events_rx, stop_rx),
        );

        cache
            .put(&RouteDefinition::new("r1", "http://r1").projection())
            .await
            .unwrap();
        events_tx.send(RouteEvent::Reload).unwrap();

        let mut loaded = false;
        for _ in 0..50 {
            if table.load().len() == 1 {
                loaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(loaded);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
