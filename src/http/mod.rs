//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (trace id, per-request span)
//!     → security (AuthGate, RateLimiter)
//!     → routing (match route, run request filters)
//!     → forward to upstream
//!     → response.rs (strip hop-by-hop headers, error bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{TraceId, X_TRACE_ID};
pub use server::GatewayServer;
