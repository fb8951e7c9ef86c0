// src/context.rs

use crate::error::{DecompositionError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Worker pool on which partition-local work and reductions run.
///
/// Every `PartitionedMatrix` carries the context it was created with, and every matrix
/// derived from it inherits that context. The default context runs on rayon's global pool.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pool: Option<Arc<ThreadPool>>,
}

impl ExecutionContext {
    /// Context backed by rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Context backed by a dedicated pool of `num_threads` workers.
    pub fn with_num_threads(num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(DecompositionError::Configuration(
                "execution context needs at least one worker thread".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("partition-worker-{}", idx))
            .build()
            .map_err(|e| DecompositionError::Configuration(format!("failed to build worker pool: {}", e)))?;
        Ok(Self { pool: Some(Arc::new(pool)) })
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Runs `op` inside this context's pool so nested rayon iterators use its workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}
