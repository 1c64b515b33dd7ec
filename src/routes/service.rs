//! Route administration: keeps the durable store, the route cache and every
//! instance's route table in step.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::capability::CapabilityRegistry;
use crate::notify::ChangeNotifier;
use crate::observability::metrics;
use crate::routes::cache::{CacheError, RouteCache};
use crate::routes::store::RouteStore;
use crate::routes::types::RouteDefinition;
use crate::routes::validator;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reading routes failed: {0}")]
    Store(#[from] StoreError),

    #[error("replacing cache failed: {0}")]
    Cache(#[from] CacheError),
}

/// Result of a save: the route as stored and whether it was new.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub route: RouteDefinition,
    pub created: bool,
}

/// Mutations hold `writes` from the store write through the cache write, so
/// the cache never gets ahead of the store.
#[derive(Clone)]
pub struct RouteAdminService {
    store: RouteStore,
    cache: Arc<dyn RouteCache>,
    notifier: ChangeNotifier,
    registry: Arc<CapabilityRegistry>,
    writes: Arc<Mutex<()>>,
}

impl RouteAdminService {
    pub fn new(
        store: RouteStore,
        cache: Arc<dyn RouteCache>,
        notifier: ChangeNotifier,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            registry,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Validate, persist the full definition, project it if eligible (remove
    /// it from the cache otherwise), then notify. Only a persistence failure
    /// is returned; a cache failure is logged and counted.
    pub async fn save(&self, mut def: RouteDefinition, operator: &str) -> Result<SaveOutcome, StoreError> {
        validator::validate(&mut def, &self.registry);
        def.creator = None;
        def.updater = Some(operator.to_string());

        let writes = self.writes.lock().await;
        let (route, created) = self.store.upsert(def).await?;
        tracing::info!(
            route_id = %route.id,
            created,
            enabled = route.enabled,
            eligible = route.is_eligible(),
            operator,
            "Route saved"
        );

        self.project(&route).await;
        drop(writes);

        self.notifier.notify_changed();
        Ok(SaveOutcome { route, created })
    }

    async fn project(&self, route: &RouteDefinition) {
        let result = if route.is_eligible() {
            self.cache.put(&route.projection()).await
        } else {
            self.cache.remove(&route.id).await
        };
        if let Err(e) = result {
            metrics::record_cache_projection_failure();
            tracing::error!(route_id = %route.id, error = %e, "Cache projection failed; store keeps the change");
        }
    }

    /// Delete from store and cache. A missing route is not an error; the
    /// return value says whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let writes = self.writes.lock().await;
        let existed = self.store.delete(id).await?;
        if let Err(e) = self.cache.remove(id).await {
            metrics::record_cache_projection_failure();
            tracing::error!(route_id = %id, error = %e, "Cache removal failed");
        }
        drop(writes);
        tracing::info!(route_id = %id, existed, "Route deleted");
        self.notifier.notify_changed();
        Ok(existed)
    }

    pub async fn get_all(&self, query: Option<&str>) -> Result<Vec<RouteDefinition>, StoreError> {
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => self.store.search(q).await,
            None => self.store.find_all().await,
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<RouteDefinition>, StoreError> {
        self.store.find_by_id(id).await
    }

    /// Ask every instance to rebuild its table from the cache.
    pub fn refresh(&self) {
        tracing::info!("Route refresh requested");
        self.notifier.notify_changed();
    }

    /// Rebuild the cache from the durable store: every enabled route that
    /// still validates against the current registry is projected, everything
    /// else is dropped. Validation results are not written back. Fires one
    /// notification and returns the number of projected routes.
    pub async fn reconcile(&self) -> Result<usize, ReconcileError> {
        let writes = self.writes.lock().await;
        let routes = self.store.find_all().await?;
        let total = routes.len();

        let projections: Vec<_> = routes
            .into_iter()
            .filter_map(|mut def| {
                validator::validate(&mut def, &self.registry);
                def.is_eligible().then(|| def.projection())
            })
            .collect();

        self.cache.replace_all(&projections).await?;
        drop(writes);
        tracing::info!(stored = total, projected = projections.len(), "Route cache reconciled");
        self.notifier.notify_changed();
        Ok(projections.len())
    }

    /// Reconcile every `interval` until shutdown.
    pub async fn run_reconciler(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; startup already reconciled.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        tracing::error!(error = %e, "Periodic reconciliation failed");
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}
