//! Bounded worker pool for engine invocations.
//!
//! Decode, filter and encode are CPU bound and can take hundreds of
//! milliseconds, so they never run on the host's callback thread. A
//! [`WorkerPool`] is a cheap-to-clone handle to one dedicated rayon pool,
//! shared by every transform the router attaches.

use crate::config::{ProcessingConfig, effective_threads};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("failed to build worker pool: {0}")]
pub struct PoolError(#[from] rayon::ThreadPoolBuildError);

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("magick-worker-{i}"))
            .build()?;
        tracing::debug!(threads = pool.current_num_threads(), "worker pool started");
        Ok(Self {
            inner: Arc::new(pool),
        })
    }

    /// Size the pool from `[processing]`, capped at the core count.
    pub fn from_config(config: &ProcessingConfig) -> Result<Self, PoolError> {
        Self::new(effective_threads(config))
    }

    /// Run `job` on a worker thread without waiting for it.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.spawn(job);
    }

    pub fn threads(&self) -> usize {
        self.inner.current_num_threads()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}
