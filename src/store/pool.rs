//! Bounded pool for blocking store work.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::resilience::{with_deadline, Elapsed};
use crate::store::StoreError;

const PENDING: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

/// Handshake between a mutation running on a worker and the caller waiting
/// on it. Whichever side moves first wins: the worker claims the commit, or
/// the caller gives up and the worker must not write.
#[derive(Debug, Clone)]
pub struct CommitGuard {
    state: Arc<AtomicU8>,
    operation: &'static str,
    after: Duration,
}

impl CommitGuard {
    fn new(operation: &'static str, after: Duration) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
            operation,
            after,
        }
    }

    /// A guard nobody will abandon, for calls made outside the pool.
    pub fn unbounded() -> Self {
        Self::new("unbounded", Duration::MAX)
    }

    /// Claim the right to write. Must be called right before the write
    /// becomes visible, while holding whatever lock protects it. Fails with
    /// `StoreError::Timeout` once the caller has given up.
    pub fn begin_commit(&self) -> Result<(), StoreError> {
        self.state
            .compare_exchange(PENDING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                Elapsed {
                    operation: self.operation,
                    after: self.after,
                }
                .into()
            })
    }

    /// Returns false if the worker already claimed the commit.
    fn abandon(&self) -> bool {
        self.state
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Runs blocking closures on at most `workers` blocking threads at a time,
/// each call bounded by a deadline.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl BlockingPool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read-only work. The deadline covers waiting for a permit as well as
    /// the work itself.
    pub async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        with_deadline(operation, self.timeout, async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Worker(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                // Held until the work finishes, even if the caller gave up.
                let _permit = permit;
                work()
            })
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?
        })
        .await
    }

    /// Work that writes. A timeout is only reported if the work had not yet
    /// called [`CommitGuard::begin_commit`]; once it has, the caller waits for
    /// the real outcome so a reported failure always means nothing was written.
    pub async fn mutate<T, F>(&self, operation: &'static str, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&CommitGuard) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = CommitGuard::new(operation, self.timeout);
        let worker_guard = guard.clone();
        let permits = self.permits.clone();

        let task = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Worker(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                work(&worker_guard)
            })
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?
        };
        tokio::pin!(task);

        match tokio::time::timeout(self.timeout, task.as_mut()).await {
            Ok(result) => result,
            Err(_) if guard.abandon() => {
                tracing::warn!(operation, after = ?self.timeout, "Store mutation timed out before commit");
                Err(Elapsed {
                    operation,
                    after: self.timeout,
                }
                .into())
            }
            Err(_) => {
                tracing::warn!(operation, "Store mutation passed its deadline while committing");
                task.await
            }
        }
    }
}
