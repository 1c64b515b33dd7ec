//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the durable store, route cache and refresh bus
//! - Wire the capability registry, notifier and services together
//! - Reconcile the cache and load the route table before taking traffic
//! - Spawn background tasks, then bind both listeners
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{serve_admin, AdminState};
use crate::capability::CapabilityRegistry;
use crate::clients::{ApiClientStore, ClientPersistence};
use crate::config::{GatewayConfig, SharedBackend, StoreBackend};
use crate::http::GatewayServer;
use crate::lifecycle::Shutdown;
use crate::notify::{ChangeNotifier, LocalRefreshBus, NotifyError, RedisRefreshBus, RefreshBus, RefreshListener};
use crate::resilience::BackoffPolicy;
use crate::routes::{
    CacheError, FileRouteRepository, MemoryRouteCache, MemoryRouteRepository, ReconcileError, RedisRouteCache,
    RouteAdminService, RouteCache, RouteRepository, RouteStore,
};
use crate::routing::{RouteTableHandle, RouteTableReloader};
use crate::security::RateLimiter;
use crate::store::{BlockingPool, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("route cache: {0}")]
    Cache(#[from] CacheError),

    #[error("refresh bus: {0}")]
    Notify(#[from] NotifyError),

    #[error("startup reconciliation: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully wired gateway instance that has not bound any socket yet.
pub struct Gateway {
    pub config: GatewayConfig,
    pub registry: Arc<CapabilityRegistry>,
    pub table: RouteTableHandle,
    pub cache: Arc<dyn RouteCache>,
    pub notifier: ChangeNotifier,
    pub routes: RouteAdminService,
    pub clients: Arc<ApiClientStore>,
    pub limiter: Arc<RateLimiter>,
}

/// Connect the configured cache and bus backends, then assemble.
pub async fn bootstrap(config: GatewayConfig) -> Result<Gateway, StartupError> {
    let cache: Arc<dyn RouteCache> = match config.cache.backend {
        SharedBackend::Memory => Arc::new(MemoryRouteCache::new()),
        SharedBackend::Redis => Arc::new(
            RedisRouteCache::connect(
                &config.cache.redis_url,
                &config.cache.routes_key,
                Duration::from_millis(config.cache.operation_timeout_ms),
            )
            .await?,
        ),
    };

    let bus: Arc<dyn RefreshBus> = match config.notifier.backend {
        SharedBackend::Memory => Arc::new(LocalRefreshBus::new()),
        SharedBackend::Redis => Arc::new(
            RedisRefreshBus::connect(
                &config.notifier.redis_url,
                &config.notifier.channel,
                Duration::from_millis(config.notifier.publish_timeout_ms),
            )
            .await?,
        ),
    };

    Gateway::assemble(config, cache, bus).await
}

impl Gateway {
    /// Build an instance on top of an existing cache and bus. Instances that
    /// share both behave like a cluster.
    pub async fn assemble(
        config: GatewayConfig,
        cache: Arc<dyn RouteCache>,
        bus: Arc<dyn RefreshBus>,
    ) -> Result<Self, StartupError> {
        let registry = Arc::new(CapabilityRegistry::builtin());
        tracing::info!(
            predicates = ?registry.predicate_names(),
            filters = ?registry.filter_names(),
            "Capability registry ready"
        );

        let pool = BlockingPool::new(
            config.store.worker_threads,
            Duration::from_millis(config.store.operation_timeout_ms),
        );

        let (repo, persistence) = match config.store.backend {
            StoreBackend::File => {
                let path = PathBuf::from(&config.store.routes_path);
                let repo: Arc<dyn RouteRepository> =
                    Arc::new(pool.run("route table open", move || FileRouteRepository::open(path)).await?);
                (repo, ClientPersistence::File(PathBuf::from(&config.store.clients_path)))
            }
            StoreBackend::Memory => {
                let repo: Arc<dyn RouteRepository> = Arc::new(MemoryRouteRepository::new());
                (repo, ClientPersistence::Memory)
            }
        };
        let store = RouteStore::new(repo, pool.clone());
        let clients = Arc::new(ApiClientStore::open(persistence, pool).await?);

        let notifier = ChangeNotifier::new(bus, BackoffPolicy::from(&config.notifier));
        let table = RouteTableHandle::new(registry.clone());
        let routes = RouteAdminService::new(store, cache.clone(), notifier.clone(), registry.clone());

        let projected = routes.reconcile().await?;
        let loaded = table.reload(cache.as_ref()).await?;
        tracing::info!(projected, loaded, "Route table initialised");

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.requests_per_second,
            Duration::from_secs(config.rate_limit.idle_ttl_secs),
        ));

        Ok(Self {
            config,
            registry,
            table,
            cache,
            notifier,
            routes,
            clients,
            limiter,
        })
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            routes: self.routes.clone(),
            clients: self.clients.clone(),
            registry: self.registry.clone(),
            table: self.table.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            operator: Arc::from(self.config.admin.operator.as_str()),
        }
    }

    pub fn gateway_server(&self) -> GatewayServer {
        GatewayServer::new(
            &self.config,
            self.table.clone(),
            self.clients.clone(),
            self.limiter.clone(),
        )
    }

    /// Refresh listener, table reloader, bucket sweeper and periodic
    /// reconciler. Each stops on shutdown.
    pub fn spawn_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let reloader = RouteTableReloader::new(self.table.clone(), self.cache.clone());
        let events = self.notifier.subscribe_local();
        tasks.push(tokio::spawn(reloader.run(events, shutdown.subscribe())));

        let listener = RefreshListener::new(&self.notifier);
        tasks.push(tokio::spawn(listener.run(shutdown.subscribe())));

        if self.config.rate_limit.enabled {
            let interval = Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1));
            tasks.push(tokio::spawn(self.limiter.clone().run_sweeper(interval, shutdown.subscribe())));
        }

        match self.config.notifier.reconcile_interval_secs {
            0 => tracing::info!("Periodic reconciliation disabled"),
            secs => {
                let interval = Duration::from_secs(secs);
                tasks.push(tokio::spawn(
                    self.routes.clone().run_reconciler(interval, shutdown.subscribe()),
                ));
            }
        }

        tasks
    }

    /// Bind both listeners and serve until shutdown.
    pub async fn serve(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let tasks = self.spawn_background(shutdown);

        let admin = if self.config.admin.enabled {
            let listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            Some(tokio::spawn(serve_admin(listener, self.admin_state(), shutdown.subscribe())))
        } else {
            tracing::info!("Admin API disabled");
            None
        };

        let listener = TcpListener::bind(&self.config.listener.bind_address).await?;
        self.gateway_server().run(listener, shutdown.subscribe()).await?;

        if let Some(admin) = admin {
            match admin.await {
                Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
                Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
                Ok(Ok(())) => {}
            }
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}
