//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store / cache / broadcast call:
//!     → timeouts.rs (every call has a deadline)
//!     → On broadcast or subscribe failure: backoff.rs (bounded, jittered retry)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only where the operation is idempotent (publish "refresh", subscribe)
//! - Attempt counts are bounded; periodic reconciliation covers what retries miss

pub mod backoff;
pub mod timeouts;

pub use backoff::{calculate_backoff, BackoffPolicy};
pub use timeouts::{with_deadline, Elapsed};
