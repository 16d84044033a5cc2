//! Execution context and thread availability.
//!
//! Instead of reading a global runtime, every call carries an
//! [`ExecutionContext`]: the thread pool it may fan out onto, how deep in
//! nested parallelism it already is, and the tuning config.

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::GemmConfig;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pool: Option<Arc<ThreadPool>>,
    nesting_depth: usize,
    config: GemmConfig,
}

impl ExecutionContext {
    /// A context with no pool: everything runs on the calling thread.
    pub fn serial() -> Self {
        Self::default()
    }

    pub fn with_pool(pool: Arc<ThreadPool>) -> Self {
        Self {
            pool: Some(pool),
            ..Self::default()
        }
    }

    /// Builds a dedicated rayon pool with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("sgemm-worker-{i}"))
            .build()?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

    pub fn with_config(mut self, config: GemmConfig) -> Self {
        self.config = config;
        self
    }

    /// Context for work running inside a parallel region opened from `self`.
    pub fn nested(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            nesting_depth: self.nesting_depth + 1,
            config: self.config.clone(),
        }
    }

    pub fn pool(&self) -> Option<&ThreadPool> {
        self.pool.as_deref()
    }

    pub fn nesting_depth(&self) -> usize {
        self.nesting_depth
    }

    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    /// Threads a new parallel region may use right now.
    ///
    /// Returns 1 inside a parallel region (nested fan-out is not allowed),
    /// when the caller is a worker of any rayon pool, or when there is no
    /// pool at all.
    pub fn available_threads(&self) -> usize {
        if self.nesting_depth > 0 || rayon::current_thread_index().is_some() {
            return 1;
        }
        self.pool().map_or(1, |pool| pool.current_num_threads().max(1))
    }
}

/// Clamps a requested thread count to what `ctx` can actually provide.
pub fn resolve_thread_count(requested: usize, ctx: &ExecutionContext) -> usize {
    requested.min(ctx.available_threads()).max(1)
}
