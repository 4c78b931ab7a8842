//! Bounded pool for blocking store work

use crate::error::{Result, ZenError};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs blocking closures on tokio's blocking threads, at most `size` at once
///
/// # Examples
///
/// ```
/// use zenchat::sync::WorkerPool;
///
/// # tokio_test::block_on(async {
/// let pool = WorkerPool::new(2);
/// let value = pool.run(|| Ok(21 * 2)).await.unwrap();
/// assert_eq!(value, 42);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool with `size` workers; zero is raised to one
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Configured worker count
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` once a worker is free
    ///
    /// The permit moves into the blocking task, so a caller that stops
    /// waiting does not free the slot before the job finishes.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ZenError::Storage("worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| ZenError::Storage(format!("worker task failed: {}", e)))?
    }
}
