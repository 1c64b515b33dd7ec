//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied requests by status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_auth_rejections_total` (counter): AuthGate rejections by reason
//! - `gateway_rate_limited_total` (counter): requests rejected with 429
//! - `gateway_route_reloads_total` (counter): route table swaps
//! - `gateway_routes_loaded` (gauge): routes in the live table
//! - `gateway_cache_projection_failures_total` (counter): failed cache writes
//! - `gateway_broadcast_failures_total` (counter): refresh publishes that gave up
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Low-cardinality labels only (no route ids, no app keys)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, start: Instant) {
    counter!("gateway_requests_total", "status" => status.to_string()).increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("gateway_auth_rejections_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited() {
    counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_route_reload(routes: usize) {
    counter!("gateway_route_reloads_total").increment(1);
    gauge!("gateway_routes_loaded").set(routes as f64);
}

pub fn record_cache_projection_failure() {
    counter!("gateway_cache_projection_failures_total").increment(1);
}

pub fn record_broadcast_failure() {
    counter!("gateway_broadcast_failures_total").increment(1);
}
