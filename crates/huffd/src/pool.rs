//! Bounded worker pool for codec jobs.
//!
//! Each job holds a permit for the duration of its run on tokio's blocking
//! thread pool, so at most `num_workers` jobs compute at once and no codec
//! work runs on the async executor. The permit returns to the pool on drop.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// A held worker slot.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    num_workers: usize,
}

impl WorkerPool {
    /// `num_workers` is at least 1.
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(num_workers)),
            num_workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Idle workers. Always 0 once closed.
    pub fn available(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.semaphore.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Take a free worker without waiting. `None` when busy or closed.
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(WorkerPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => None,
        }
    }

    /// Wait for a free worker.
    pub async fn acquire(&self) -> Result<WorkerPermit, PoolError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(WorkerPermit { _permit: permit })
    }

    /// Run `f` on a blocking thread once a worker is free.
    pub async fn run<F, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire().await?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| PoolError::Panicked(e.to_string()))
    }

    /// Refuse new work. Jobs already running finish normally.
    pub fn close(&self) {
        if !self.semaphore.is_closed() {
            tracing::info!(workers = self.num_workers, "Closing worker pool");
            self.semaphore.close();
        }
    }
}
