//! Durable storage plumbing shared by the route and client stores.
//!
//! # Data Flow
//! ```text
//! async caller (admin handler, startup)
//!     → BlockingPool::run (semaphore permit + deadline)
//!     → spawn_blocking worker
//!     → repository (file or memory)
//!     → write_atomic (temp file + rename) on mutation
//! ```
//!
//! # Design Decisions
//! - Blocking I/O never runs on the async executor threads
//! - The pool bounds concurrent store work; excess callers wait for a permit
//! - Mutations go through `BlockingPool::mutate`: the worker claims the
//!   commit under its lock, so a reported timeout means nothing was written

pub mod file;
pub mod pool;

use thiserror::Error;

use crate::resilience::Elapsed;

pub use file::{read_json, write_atomic};
pub use pool::{BlockingPool, CommitGuard};

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Timeout(#[from] Elapsed),

    #[error("store worker failed: {0}")]
    Worker(String),

    #[error("corrupt row '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}
