//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every store, cache and broadcast call
//! - Report which operation timed out
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - The timed-out future is dropped; the remote side may still apply it

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} timed out after {after:?}")]
pub struct Elapsed {
    pub operation: &'static str,
    pub after: Duration,
}

/// Run `fut` with a deadline; flattens the inner result.
pub async fn with_deadline<T, E, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Elapsed>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?after, "Operation timed out");
            Err(Elapsed { operation, after }.into())
        }
    }
}
