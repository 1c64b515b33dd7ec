//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!     → per-request spans carrying the trace id (http::request)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Trace id flows through every log line of a request via its span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
