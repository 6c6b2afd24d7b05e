//! Bounded pool for CPU-bound work
//!
//! Checksums, diffs and reconstruction run on tokio's blocking threads,
//! at most `size` at a time, so they never stall the I/O workers.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Compute pool closed")]
    Closed,

    #[error("Compute task failed: {0}")]
    TaskFailed(String),
}

pub type ComputeResult<T> = Result<T, ComputeError>;

#[derive(Clone)]
pub struct ComputePool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl ComputePool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// One slot per CPU
    pub fn with_default_size() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on a blocking thread once a slot is free
    pub async fn run<F, T>(&self, f: F) -> ComputeResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ComputeError::Closed)?;

        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ComputeError::TaskFailed(e.to_string()))
    }
}

impl Default for ComputePool {
    fn default() -> Self {
        Self::with_default_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = ComputePool::new(2);
        let sum = pool.run(|| (1..=100u32).sum::<u32>()).await.unwrap();
        assert_eq!(sum, 5050);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = ComputePool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    pool.run(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                }
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let pool = ComputePool::new(1);
        let result = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(ComputeError::TaskFailed(_))));
        assert_eq!(pool.available(), 1);
    }
}
