//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (public listener):
//!     → auth.rs (buffer body, verify HMAC signature, 401 on failure)
//!     → rate_limit.rs (token bucket per app key / peer ip / path, 429 on empty)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Authentication runs before rate limiting so app keys are only trusted
//!   once verified
//! - Signature comparison is constant time
//! - No replay cache: nonces are signed but not remembered

pub mod auth;
pub mod rate_limit;
pub mod signature;

pub use auth::{auth_middleware, authenticate, AuthError, AuthState, AuthenticatedClient};
pub use rate_limit::{rate_limit_key, rate_limit_middleware, RateLimiter};
