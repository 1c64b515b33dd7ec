//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use route_gateway::admin::serve_admin;
use route_gateway::config::{GatewayConfig, StoreBackend};
use route_gateway::notify::LocalRefreshBus;
use route_gateway::routes::MemoryRouteCache;
use route_gateway::{Gateway, Shutdown};

/// Start a backend that answers every request with a JSON description of it:
/// `{backend, method, path, query, body, headers}`.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |request: Request| async move {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
        let headers: BTreeMap<String, String> = parts
            .headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        Json(json!({
            "backend": name,
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "body": String::from_utf8_lossy(&body),
            "headers": headers,
        }))
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

pub const ADMIN_KEY: &str = "test-admin-key";

/// In-memory store, cache and bus; no periodic reconciliation.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.store.backend = StoreBackend::Memory;
    config.admin.api_key = ADMIN_KEY.to_string();
    config.notifier.reconcile_interval_secs = 0;
    config.notifier.base_delay_ms = 10;
    config.notifier.max_delay_ms = 50;
    config.observability.metrics_enabled = false;
    config
}

/// One running gateway instance with both listeners on ephemeral ports.
pub struct TestInstance {
    pub gateway: Gateway,
    pub proxy_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestInstance {
    pub async fn start(config: GatewayConfig) -> Self {
        Self::start_shared(config, MemoryRouteCache::new(), LocalRefreshBus::new()).await
    }

    /// Instances started with clones of the same cache and bus form a cluster.
    pub async fn start_shared(config: GatewayConfig, cache: MemoryRouteCache, bus: LocalRefreshBus) -> Self {
        let gateway = Gateway::assemble(config, Arc::new(cache), Arc::new(bus))
            .await
            .expect("gateway assembles");
        let shutdown = Shutdown::new();
        gateway.spawn_background(&shutdown);

        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        let server = gateway.gateway_server();
        tokio::spawn(server.run(proxy, shutdown.subscribe()));

        let admin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let admin_addr = admin.local_addr().unwrap();
        tokio::spawn(serve_admin(admin, gateway.admin_state(), shutdown.subscribe()));

        // Give the refresh listener time to subscribe.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            gateway,
            proxy_addr,
            admin_addr,
            shutdown,
        }
    }

    pub fn proxy_url(&self, path: &str) -> String {
        format!("http://{}{}", self.proxy_addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}/admin{}", self.admin_addr, path)
    }

    pub fn admin(&self) -> AdminClient {
        AdminClient {
            http: reqwest::Client::new(),
            base: format!("http://{}/admin", self.admin_addr),
        }
    }

    /// Poll until the live table holds `expected` routes.
    pub async fn wait_for_routes(&self, expected: usize) {
        wait_until(|| self.gateway.table.load().len() == expected).await;
    }
}

impl Drop for TestInstance {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Bearer-authenticated admin API calls.
pub struct AdminClient {
    http: reqwest::Client,
    base: String,
}

impl AdminClient {
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{}", self.base, path))
            .bearer_auth(ADMIN_KEY)
            .send()
            .await
            .unwrap()
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.base, path))
            .bearer_auth(ADMIN_KEY)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn put(&self, path: &str, body: &Value) -> reqwest::Response {
        self.http
            .put(format!("{}{}", self.base, path))
            .bearer_auth(ADMIN_KEY)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.http
            .delete(format!("{}{}", self.base, path))
            .bearer_auth(ADMIN_KEY)
            .send()
            .await
            .unwrap()
    }
}

/// Poll `condition` every 10ms for up to 2s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// Route JSON forwarding `/{prefix}/**` to `upstream` with the prefix stripped.
pub fn prefix_route(id: &str, prefix: &str, upstream: SocketAddr) -> Value {
    json!({
        "id": id,
        "uri": format!("http://{}", upstream),
        "order": 0,
        "predicates": [{ "name": "Path", "args": { "patterns": format!("/{}/**", prefix) } }],
        "filters": [{ "name": "StripPrefix", "args": { "parts": "1" } }],
    })
}
