//! Bounded worker pool for dispatching evaluations (§5 "Concurrency & Resource
//! Model"): one in-flight evaluation per logical request, parallelism across
//! requests bounded by a fixed-size pool.
//!
//! The core itself never suspends (§5); the only suspension point is here, at
//! the boundary, where the request handler awaits a free slot before running
//! the (synchronous, CPU-bound) evaluation. Sized by `evaluation_pool_size` in
//! the original Python's `main.py` (a `ThreadPoolExecutor`); the Rust
//! equivalent is a `tokio::sync::Semaphore` guarding `spawn_blocking`, which
//! keeps the CPU-bound kernel off the async reactor threads the way axum's own
//! handlers expect (clarium's own `AppState` holds its shared mutable state
//! behind `Arc<RwLock<_>>`/`parking_lot`, the same "bound the access, not the
//! work" shape).

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::AppError;

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        WorkerPool { semaphore: Arc::new(Semaphore::new(size.max(1))) }
    }

    /// Run `f` once a slot is free. `f` is the synchronous, CPU-bound
    /// evaluation core; it is moved onto a blocking thread so the bounded
    /// pool never starves the async runtime (§5 "Suspension points").
    pub async fn run<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::evaluation("worker pool semaphore closed"))?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| AppError::evaluation(format!("worker task panicked: {e}")))?;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_closure_and_returns_its_result() {
        let pool = WorkerPool::new(2);
        let out = pool.run(|| Ok::<_, AppError>(21 * 2)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn bounds_concurrency_to_pool_size() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let pool = WorkerPool::new(1);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, AppError>(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
