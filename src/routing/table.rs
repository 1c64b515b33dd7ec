//! Compiled routes and the swappable route table.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::{request::Parts, HeaderMap};
use thiserror::Error;
use url::Url;

use crate::capability::{BuildError, CapabilityRegistry, Exchange, RouteFilter, RoutePredicate};
use crate::observability::metrics;
use crate::routes::cache::{CacheError, RouteCache};
use crate::routes::types::RouteProjection;

#[derive(Debug, Error)]
pub enum RouteCompileError {
    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error(transparent)]
    Capability(#[from] BuildError),
}

/// A route ready to serve traffic.
#[derive(Debug)]
pub struct Route {
    pub id: String,
    pub order: i32,
    pub upstream: Url,
    predicates: Vec<Box<dyn RoutePredicate>>,
    filters: Vec<Box<dyn RouteFilter>>,
}

impl Route {
    pub fn compile(
        projection: &RouteProjection,
        registry: &CapabilityRegistry,
    ) -> Result<Self, RouteCompileError> {
        let upstream = Url::parse(&projection.uri).map_err(|e| RouteCompileError::InvalidUri {
            uri: projection.uri.clone(),
            reason: e.to_string(),
        })?;

        let predicates = projection
            .predicates
            .iter()
            .map(|p| registry.build_predicate(&p.name, &p.args))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = projection
            .filters
            .iter()
            .map(|f| registry.build_filter(&f.name, &f.args))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: projection.id.clone(),
            order: projection.order,
            upstream,
            predicates,
            filters,
        })
    }

    /// All predicates must match. A route without predicates matches everything.
    pub fn matches(&self, req: &Parts) -> bool {
        self.predicates.iter().all(|p| p.matches(req))
    }

    /// Run request filters in declaration order, stopping at the first
    /// rejection.
    pub fn exchange(&self, req: &Parts) -> Exchange {
        let mut exchange = Exchange::new(req, self.upstream.clone());
        for filter in &self.filters {
            filter.on_request(&mut exchange);
            if exchange.rejection.is_some() {
                break;
            }
        }
        exchange
    }

    pub fn apply_response_filters(&self, headers: &mut HeaderMap) {
        for filter in &self.filters {
            filter.on_response(headers);
        }
    }
}

/// Immutable, ordered set of compiled routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile every projection independently. Failures are logged and the
    /// route is left out; they never abort the rest of the table.
    pub fn compile(projections: &[RouteProjection], registry: &CapabilityRegistry) -> Self {
        let mut routes: Vec<Arc<Route>> = projections
            .iter()
            .filter_map(|p| match Route::compile(p, registry) {
                Ok(route) => Some(Arc::new(route)),
                Err(e) => {
                    tracing::error!(route_id = %p.id, error = %e, "Route failed to compile, skipping");
                    None
                }
            })
            .collect();
        routes.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn match_request(&self, req: &Parts) -> Option<Arc<Route>> {
        self.routes.iter().find(|r| r.matches(req)).cloned()
    }
}

/// Shared handle to the live route table.
#[derive(Clone)]
pub struct RouteTableHandle {
    current: Arc<ArcSwap<RouteTable>>,
    registry: Arc<CapabilityRegistry>,
}

impl RouteTableHandle {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(RouteTable::empty())),
            registry,
        }
    }

    pub fn load(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    pub fn match_request(&self, req: &Parts) -> Option<Arc<Route>> {
        self.current.load().match_request(req)
    }

    /// Rebuild the table from the cache and swap it in. On a cache error the
    /// current table stays in place.
    pub async fn reload(&self, cache: &dyn RouteCache) -> Result<usize, CacheError> {
        let projections = cache.projections().await?;
        let table = RouteTable::compile(&projections, &self.registry);
        let count = table.len();
        self.current.store(Arc::new(table));
        metrics::record_route_reload(count);
        tracing::info!(routes = count, "Route table reloaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::types::RouteDefinition;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    fn projection(id: &str, order: i32, pattern: &str) -> RouteProjection {
        let mut def = RouteDefinition::new(id, format!("http://{}:80", id))
            .with_predicate("Path", &[("patterns", pattern)]);
        def.order = order;
        def.projection()
    }

    #[test]
    fn test_order_then_id() {
        let registry = CapabilityRegistry::builtin();
        let table = RouteTable::compile(
            &[
                projection("zeta", 0, "/api/**"),
                projection("alpha", 0, "/api/**"),
                projection("first", -1, "/api/special"),
            ],
            &registry,
        );

        assert_eq!(table.ids(), vec!["first", "alpha", "zeta"]);
        assert_eq!(table.match_request(&parts("/api/special")).unwrap().id, "first");
        assert_eq!(table.match_request(&parts("/api/other")).unwrap().id, "alpha");
        assert!(table.match_request(&parts("/nothing")).is_none());
    }

    #[test]
    fn test_bad_route_does_not_abort_compilation() {
        let registry = CapabilityRegistry::builtin();
        let mut missing_arg = projection("broken", 0, "/b/**");
        missing_arg.predicates[0].args.clear();
        let mut bad_uri = projection("bad-uri", 0, "/c/**");
        bad_uri.uri = "not a uri".into();

        let table = RouteTable::compile(
            &[missing_arg, bad_uri, projection("ok", 0, "/a/**")],
            &registry,
        );
        assert_eq!(table.ids(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_reload_swaps_table() {
        use crate::routes::cache::MemoryRouteCache;

        let handle = RouteTableHandle::new(Arc::new(CapabilityRegistry::builtin()));
        let before = handle.load();
        let cache = MemoryRouteCache::new();
        cache.put(&projection("a", 0, "/a/**")).await.unwrap();

        assert_eq!(handle.reload(&cache).await.unwrap(), 1);
        assert!(before.is_empty());
        assert_eq!(handle.match_request(&parts("/a/1")).unwrap().id, "a");
    }
}
