//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, trace id, timeout, auth, rate limit)
//! - Bind server to listener, stop on shutdown
//! - Match the route table, run filters, forward to the upstream

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode, Uri},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::clients::ClientDirectory;
use crate::config::GatewayConfig;
use crate::http::request::trace_id_middleware;
use crate::http::response::{error_response, strip_hop_by_hop};
use crate::observability::metrics;
use crate::routing::RouteTableHandle;
use crate::security::{auth_middleware, rate_limit_middleware, AuthState, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: RouteTableHandle,
    pub client: Client<HttpConnector, Body>,
}

/// Public gateway listener.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(
        config: &GatewayConfig,
        table: RouteTableHandle,
        clients: Arc<dyn ClientDirectory>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let auth = AuthState {
            clients,
            enabled: config.auth.enabled,
            tolerance_secs: config.auth.timestamp_tolerance_secs,
            max_body_size: config.security.max_body_size,
        };

        let state = AppState { table, client };
        let router = Self::build_router(config, state, auth, limiter);
        Self { router }
    }

    /// Build the Axum router with all middleware layers. The last layer added
    /// runs first.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState, auth: AuthState, limiter: Arc<RateLimiter>) -> Router {
        let mut router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state);

        if config.rate_limit.enabled {
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        router
            .layer(middleware::from_fn_with_state(auth, auth_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::from_fn(trace_id_middleware))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// shutdown is signalled.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listener starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Gateway listener stopped");
        Ok(())
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let Some(route) = state.table.match_request(&parts) else {
        tracing::debug!(path = %path, "No route matched");
        metrics::record_request(404, start);
        return error_response(StatusCode::NOT_FOUND, "No matching route found", &path);
    };

    let exchange = route.exchange(&parts);
    if let Some(rejection) = &exchange.rejection {
        tracing::info!(
            route_id = %route.id,
            status = %rejection.status,
            reason = %rejection.message,
            "Request rejected by filter"
        );
        metrics::record_request(rejection.status.as_u16(), start);
        return error_response(rejection.status, &rejection.message, &path);
    }
    if exchange.upstream.scheme() != "http" {
        tracing::error!(route_id = %route.id, upstream = %exchange.upstream, "Unsupported upstream scheme");
        metrics::record_request(502, start);
        return error_response(StatusCode::BAD_GATEWAY, "Unsupported upstream scheme", &path);
    }

    let target = exchange.target_url();
    let uri: Uri = match target.parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(route_id = %route.id, target = %target, error = %e, "Invalid upstream target");
            metrics::record_request(502, start);
            return error_response(StatusCode::BAD_GATEWAY, "Invalid upstream target", &path);
        }
    };

    let mut headers = exchange.headers;
    strip_hop_by_hop(&mut headers);
    // hyper sets Host from the upstream uri.
    headers.remove(header::HOST);

    let mut upstream = Request::new(body);
    *upstream.method_mut() = exchange.method;
    *upstream.uri_mut() = uri;
    *upstream.headers_mut() = headers;

    tracing::debug!(route_id = %route.id, target = %target, "Forwarding request");

    match state.client.request(upstream).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            route.apply_response_filters(&mut parts.headers);
            metrics::record_request(parts.status.as_u16(), start);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(route_id = %route.id, target = %target, error = %e, "Upstream error");
            metrics::record_request(502, start);
            error_response(StatusCode::BAD_GATEWAY, "Upstream request failed", &path)
        }
    }
}
