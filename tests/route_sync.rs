//! Admin mutations flowing through store, cache, notifier and route table.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::*;
use route_gateway::capability::CapabilityRegistry;
use route_gateway::config::{GatewayConfig, StoreBackend};
use route_gateway::notify::{ChangeNotifier, LocalRefreshBus};
use route_gateway::resilience::BackoffPolicy;
use route_gateway::routes::{
    CacheError, MemoryRouteCache, MemoryRouteRepository, RouteAdminService, RouteCache, RouteDefinition,
    RouteProjection, RouteRepository, RouteStore, FILTER_NOT_FOUND, PREDICATE_NOT_FOUND,
};
use route_gateway::store::{BlockingPool, CommitGuard, StoreError};
use route_gateway::Gateway;

fn open_config() -> GatewayConfig {
    let mut config = test_config();
    config.auth.enabled = false;
    config.rate_limit.enabled = false;
    config
}

#[tokio::test]
async fn test_saved_route_serves_traffic() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;

    let res = instance.admin().post("/routes", &prefix_route("orders", "orders", backend)).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let saved: Value = res.json().await.unwrap();
    assert_eq!(saved["enabled"], true);
    assert_eq!(saved["creator"], "admin");
    assert!(cache.contains("orders").await);

    instance.wait_for_routes(1).await;
    let echo: Value = reqwest::get(instance.proxy_url("/orders/42?expand=true"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["backend"], "orders");
    assert_eq!(echo["path"], "/42");
    assert_eq!(echo["query"], "expand=true");
}

#[tokio::test]
async fn test_unmatched_request_is_404_json() {
    let instance = TestInstance::start(open_config()).await;

    let res = reqwest::get(instance.proxy_url("/nowhere")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], 404);
    assert_eq!(body["path"], "/nowhere");
}

#[tokio::test]
async fn test_saving_twice_updates_in_place() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;
    let admin = instance.admin();
    let route = prefix_route("orders", "orders", backend);

    assert_eq!(admin.post("/routes", &route).await.status(), StatusCode::CREATED);
    let first = cache.raw_entries().await.unwrap();
    assert_eq!(admin.post("/routes", &route).await.status(), StatusCode::OK);
    let second = cache.raw_entries().await.unwrap();

    assert_eq!(first, second);
    let all: Vec<Value> = admin.get("/routes").await.json().await.unwrap();
    assert_eq!(all.len(), 1);
    instance.wait_for_routes(1).await;
}

#[tokio::test]
async fn test_unknown_filter_is_stored_but_not_projected() {
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;
    let admin = instance.admin();

    let route = json!({
        "id": "broken",
        "uri": "http://127.0.0.1:9",
        "predicates": [{ "name": "path", "args": { "patterns": "/broken/**" } }],
        "filters": [{ "name": "NoSuchFilter", "args": {} }],
    });
    let res = admin.post("/routes", &route).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let saved: Value = res.json().await.unwrap();
    assert_eq!(saved["enabled"], false);
    assert_eq!(saved["filterDescription"], FILTER_NOT_FOUND);
    assert_eq!(saved["predicates"][0]["name"], "Path");

    assert!(!cache.contains("broken").await);
    let stored: Value = admin.get("/routes/broken").await.json().await.unwrap();
    assert_eq!(stored["filterDescription"], FILTER_NOT_FOUND);
    assert_eq!(instance.gateway.table.load().len(), 0);
}

#[tokio::test]
async fn test_disabling_route_removes_projection() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;
    let admin = instance.admin();

    let mut route = prefix_route("orders", "orders", backend);
    admin.post("/routes", &route).await;
    instance.wait_for_routes(1).await;

    route["enabled"] = json!(false);
    assert_eq!(admin.post("/routes", &route).await.status(), StatusCode::OK);
    assert!(!cache.contains("orders").await);
    instance.wait_for_routes(0).await;

    let res = reqwest::get(instance.proxy_url("/orders/1")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_route() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;
    let admin = instance.admin();

    admin.post("/routes", &prefix_route("orders", "orders", backend)).await;
    instance.wait_for_routes(1).await;

    let res = admin.delete("/routes/orders").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await.unwrap()["deleted"], true);
    assert!(!cache.contains("orders").await);
    instance.wait_for_routes(0).await;
    assert_eq!(admin.get("/routes/orders").await.status(), StatusCode::NOT_FOUND);

    let again = admin.delete("/routes/orders").await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(again.json::<Value>().await.unwrap()["deleted"], false);
}

#[tokio::test]
async fn test_search_routes() {
    let backend = start_echo_backend("any").await;
    let instance = TestInstance::start(open_config()).await;
    let admin = instance.admin();
    admin.post("/routes", &prefix_route("orders", "orders", backend)).await;
    admin.post("/routes", &prefix_route("users", "users", backend)).await;

    let hits: Vec<Value> = admin.get("/routes?query=ORD").await.json().await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "orders");
}

#[tokio::test]
async fn test_reconcile_rebuilds_cache_from_store() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;
    let admin = instance.admin();

    admin.post("/routes", &prefix_route("orders", "orders", backend)).await;
    cache.insert_raw("stale", "{\"not\":\"a route\"}").await;
    cache.remove("orders").await.unwrap();

    let res = admin.post("/routes/reconcile", &json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await.unwrap()["projected"], 1);
    assert!(cache.contains("orders").await);
    assert!(!cache.contains("stale").await);
    instance.wait_for_routes(1).await;
}

#[tokio::test]
async fn test_change_reaches_every_instance() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let bus = LocalRefreshBus::new();
    let a = TestInstance::start_shared(open_config(), cache.clone(), bus.clone()).await;
    let b = TestInstance::start_shared(open_config(), cache.clone(), bus.clone()).await;

    a.admin().post("/routes", &prefix_route("orders", "orders", backend)).await;
    b.wait_for_routes(1).await;

    let echo: Value = reqwest::get(b.proxy_url("/orders/7")).await.unwrap().json().await.unwrap();
    assert_eq!(echo["path"], "/7");

    b.admin().delete("/routes/orders").await;
    a.wait_for_routes(0).await;
}

#[tokio::test]
async fn test_refresh_reloads_table_from_cache() {
    let backend = start_echo_backend("orders").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;

    let projection = RouteProjection {
        id: "direct".into(),
        uri: format!("http://{}", backend),
        order: 0,
        predicates: vec![],
        filters: vec![],
    };
    cache.put(&projection).await.unwrap();
    assert_eq!(instance.gateway.table.load().len(), 0);

    let res = instance.admin().post("/routes/refresh", &json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    instance.wait_for_routes(1).await;
}

/// Cache whose writes can be switched to fail.
#[derive(Clone, Default)]
struct FlakyCache {
    inner: MemoryRouteCache,
    failing: Arc<AtomicBool>,
}

impl FlakyCache {
    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Serialization(serde_json::from_str::<Value>("x").unwrap_err()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RouteCache for FlakyCache {
    async fn put(&self, projection: &RouteProjection) -> Result<(), CacheError> {
        self.check()?;
        self.inner.put(projection).await
    }

    async fn remove(&self, id: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.remove(id).await
    }

    async fn raw_entries(&self) -> Result<Vec<(String, String)>, CacheError> {
        self.inner.raw_entries().await
    }

    async fn replace_all(&self, projections: &[RouteProjection]) -> Result<(), CacheError> {
        self.check()?;
        self.inner.replace_all(projections).await
    }
}

#[tokio::test]
async fn test_projection_failure_keeps_store_write() {
    let cache = FlakyCache::default();
    let gateway = Gateway::assemble(open_config(), Arc::new(cache.clone()), Arc::new(LocalRefreshBus::new()))
        .await
        .unwrap();

    cache.failing.store(true, Ordering::SeqCst);
    let def = serde_json::from_value(prefix_route("orders", "orders", "127.0.0.1:9".parse().unwrap())).unwrap();
    let outcome = gateway.routes.save(def, "ops").await.unwrap();
    assert!(outcome.created);
    assert!(!cache.inner.contains("orders").await);
    assert!(gateway.routes.get_by_id("orders").await.unwrap().is_some());

    assert!(gateway.routes.reconcile().await.is_err());

    cache.failing.store(false, Ordering::SeqCst);
    assert_eq!(gateway.routes.reconcile().await.unwrap(), 1);
    assert!(cache.inner.contains("orders").await);
}

#[tokio::test]
async fn test_routes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = open_config();
    config.store.backend = StoreBackend::File;
    config.store.routes_path = dir.path().join("routes.json").display().to_string();
    config.store.clients_path = dir.path().join("clients.json").display().to_string();

    let backend = start_echo_backend("orders").await;
    {
        let first = TestInstance::start(config.clone()).await;
        first.admin().post("/routes", &prefix_route("orders", "orders", backend)).await;
        first.admin().post("/clients", &json!({ "description": "billing" })).await;
    }

    // Fresh cache: startup reconciliation repopulates it from the file.
    let second = TestInstance::start(config).await;
    assert_eq!(second.gateway.table.load().len(), 1);
    assert_eq!(second.gateway.clients.len(), 1);
}

#[tokio::test]
async fn test_cache_only_holds_eligible_routes() {
    let backend = start_echo_backend("any").await;
    let cache = MemoryRouteCache::new();
    let instance = TestInstance::start_shared(open_config(), cache.clone(), LocalRefreshBus::new()).await;
    let admin = instance.admin();

    admin.post("/routes", &prefix_route("orders", "orders", backend)).await;
    admin.post("/routes", &prefix_route("users", "users", backend)).await;

    let mut disabled = prefix_route("legacy", "legacy", backend);
    disabled["enabled"] = json!(false);
    admin.post("/routes", &disabled).await;

    let mut bad_filter = prefix_route("bad-filter", "bad-filter", backend);
    bad_filter["filters"] = json!([{ "name": "NoSuchFilter", "args": {} }]);
    admin.post("/routes", &bad_filter).await;

    let mut bad_predicate = prefix_route("bad-predicate", "bad-predicate", backend);
    bad_predicate["predicates"] = json!([{ "name": "NoSuchPredicate", "args": {} }]);
    let saved: Value = admin.post("/routes", &bad_predicate).await.json().await.unwrap();
    assert_eq!(saved["predicateDescription"], PREDICATE_NOT_FOUND);

    // Re-saving a valid route as invalid must pull it back out.
    let mut broken_users = prefix_route("users", "users", backend);
    broken_users["filters"] = json!([{ "name": "NoSuchFilter", "args": {} }]);
    admin.post("/routes", &broken_users).await;

    let entries = cache.raw_entries().await.unwrap();
    let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["orders"]);

    for (id, raw) in &entries {
        let projection: RouteProjection = serde_json::from_str(raw).unwrap();
        assert_eq!(&projection.id, id);
        let stored: Value = admin.get(&format!("/routes/{}", id)).await.json().await.unwrap();
        assert_eq!(stored["enabled"], true);
        assert!(stored["predicateDescription"].is_null());
        assert!(stored["filterDescription"].is_null());
    }
}

/// Cache whose writes take a while to land.
#[derive(Clone, Default)]
struct SlowPutCache {
    inner: MemoryRouteCache,
}

#[async_trait]
impl RouteCache for SlowPutCache {
    async fn put(&self, projection: &RouteProjection) -> Result<(), CacheError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.inner.put(projection).await
    }

    async fn remove(&self, id: &str) -> Result<(), CacheError> {
        self.inner.remove(id).await
    }

    async fn raw_entries(&self) -> Result<Vec<(String, String)>, CacheError> {
        self.inner.raw_entries().await
    }

    async fn replace_all(&self, projections: &[RouteProjection]) -> Result<(), CacheError> {
        self.inner.replace_all(projections).await
    }
}

#[tokio::test]
async fn test_delete_during_slow_projection_leaves_cache_clean() {
    let cache = SlowPutCache::default();
    let gateway = Gateway::assemble(open_config(), Arc::new(cache.clone()), Arc::new(LocalRefreshBus::new()))
        .await
        .unwrap();

    let def: RouteDefinition =
        serde_json::from_value(prefix_route("r1", "r1", "127.0.0.1:9".parse().unwrap())).unwrap();
    let routes = gateway.routes.clone();
    let save = tokio::spawn(async move { routes.save(def, "ops").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    gateway.routes.delete("r1").await.unwrap();
    save.await.unwrap().unwrap();

    assert!(gateway.routes.get_by_id("r1").await.unwrap().is_none());
    assert!(!cache.inner.contains("r1").await);
}

/// Repository whose writes stall before reaching the table.
struct SlowRepo {
    inner: MemoryRouteRepository,
    delay: Duration,
}

impl RouteRepository for SlowRepo {
    fn upsert(&self, def: RouteDefinition, guard: &CommitGuard) -> Result<(RouteDefinition, bool), StoreError> {
        std::thread::sleep(self.delay);
        self.inner.upsert(def, guard)
    }

    fn delete(&self, id: &str, guard: &CommitGuard) -> Result<bool, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.delete(id, guard)
    }

    fn find_all(&self) -> Result<Vec<RouteDefinition>, StoreError> {
        self.inner.find_all()
    }

    fn find_by_id(&self, id: &str) -> Result<Option<RouteDefinition>, StoreError> {
        self.inner.find_by_id(id)
    }
}

#[tokio::test]
async fn test_timed_out_save_is_not_applied() {
    let repo = Arc::new(SlowRepo {
        inner: MemoryRouteRepository::new(),
        delay: Duration::from_millis(200),
    });
    let store = RouteStore::new(repo.clone(), BlockingPool::new(1, Duration::from_millis(50)));
    let cache = MemoryRouteCache::new();
    let notifier = ChangeNotifier::new(Arc::new(LocalRefreshBus::new()), BackoffPolicy::new(1, 10, 10));
    let service = RouteAdminService::new(
        store,
        Arc::new(cache.clone()),
        notifier,
        Arc::new(CapabilityRegistry::builtin()),
    );

    let def: RouteDefinition =
        serde_json::from_value(prefix_route("r1", "r1", "127.0.0.1:9".parse().unwrap())).unwrap();
    let err = service.save(def, "ops").await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout(e) if e.operation == "route upsert"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(repo.inner.find_by_id("r1").unwrap().is_none());
    assert!(!cache.contains("r1").await);
}
