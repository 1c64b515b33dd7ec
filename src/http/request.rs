//! Request correlation.
//!
//! # Responsibilities
//! - Read `X-Trace-Id` from the caller or generate one
//! - Propagate it to the upstream and echo it on the response
//! - Open the per-request span every log line of the request is recorded in
//!
//! # Design Decisions
//! - Trace id added as early as possible, before authentication
//! - Context travels explicitly in the span and request extensions, never in
//!   thread locals

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const X_TRACE_ID: &str = "x-trace-id";

/// Trace id of the current request, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

/// Middleware that ensures every request carries a trace id.
pub async fn trace_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .and_then(|v| HeaderValue::from_str(v).ok().map(|hv| (v.to_string(), hv)));

    let (trace_id, value) = match incoming {
        Some(found) => found,
        None => {
            let TraceId(id) = TraceId::generate();
            // A simple uuid is always a valid header value.
            let value = HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            (id, value)
        }
    };

    request.headers_mut().insert(X_TRACE_ID, value.clone());
    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    response.headers_mut().insert(X_TRACE_ID, value);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|request: Request<Body>| async move {
                    request
                        .extensions()
                        .get::<TraceId>()
                        .map(|t| t.0.clone())
                        .unwrap_or_default()
                }),
            )
            .layer(axum::middleware::from_fn(trace_id_middleware))
    }

    #[tokio::test]
    async fn test_generates_trace_id() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = response.headers().get(X_TRACE_ID).unwrap().to_str().unwrap();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }

    #[tokio::test]
    async fn test_keeps_incoming_trace_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Trace-Id", "abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(X_TRACE_ID).unwrap(), "abc123");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"abc123");
    }
}
