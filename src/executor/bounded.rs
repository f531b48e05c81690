//! Admission gate in front of a worker pool.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::worker_pool::{TaskHandle, WorkerPool};
use crate::config::WORKER_THREAD_PREFIX;
use crate::error_handling::ExecutorError;
use crate::sync::Semaphore;

/// Caps the number of outstanding tasks handed to a [`WorkerPool`].
///
/// The permit count is `bound + max_workers`, so `bound` is the number of
/// tasks allowed to wait in the queue while every worker is busy. A task
/// holds its permit from `submit` until it has finished running, whether it
/// returned or panicked.
pub struct BoundedExecutor {
    pool: WorkerPool,
    permits: Arc<Semaphore>,
    block_timeout: Duration,
}

impl BoundedExecutor {
    pub fn new(bound: usize, max_workers: usize, block_timeout: Duration) -> std::io::Result<Self> {
        let pool = WorkerPool::new(max_workers, WORKER_THREAD_PREFIX)?;
        Ok(Self::with_pool(pool, bound, block_timeout))
    }

    /// Wraps an existing pool. The permit count is `bound + pool.size()`.
    pub fn with_pool(pool: WorkerPool, bound: usize, block_timeout: Duration) -> Self {
        let permits = Arc::new(Semaphore::new(bound + pool.size()));
        BoundedExecutor {
            pool,
            permits,
            block_timeout,
        }
    }

    /// Submits `task`, waiting up to the block timeout for a free slot.
    ///
    /// Returns `Ok(None)` when no slot freed up in time; the task is dropped
    /// and never retried.
    ///
    /// # Errors
    ///
    /// Propagates the worker pool's rejection (`ExecutorError::ShutDown`).
    /// The permit taken for the task is released before returning.
    pub fn submit<F, T>(&self, task: F) -> Result<Option<TaskHandle<T>>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(permit) = self.permits.acquire_owned_timeout(self.block_timeout) else {
            warn!(
                "Maximum time to wait for a free slot has elapsed ({:?}), dropping task",
                self.block_timeout
            );
            return Ok(None);
        };

        // The permit lives inside the job: it is released when the task
        // finishes or unwinds, or when a rejected job is dropped unrun.
        let handle = self.pool.submit(move || {
            let _permit = permit;
            task()
        })?;
        Ok(Some(handle))
    }

    /// Forwards to the worker pool. With `wait`, blocks until every accepted
    /// task has finished.
    pub fn shutdown(&self, wait: bool) {
        debug!("Shutting down bounded executor (wait: {wait})");
        self.pool.shutdown(wait);
    }

    pub fn capacity(&self) -> usize {
        self.permits.capacity()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Tasks accepted by the underlying worker pool.
    pub fn accepted(&self) -> usize {
        self.pool.accepted()
    }
}
