// src/error.rs

use std::error::Error;
use std::fmt;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Errors returned by the decomposition entry points and the partitioned-matrix operations.
///
/// Every fatal error aborts the whole call; no partial result is ever returned.
#[derive(Debug, Error)]
pub enum DecompositionError {
    /// Invalid parameters or an invalid partition layout.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The Gram matrix is not numerically positive definite and rank checking is enabled.
    #[error("rank deficiency detected: {0}")]
    RankDeficiency(String),
    /// Two matrices with different partitioning schemes were zipped.
    #[error("partitioning mismatch: {0}")]
    PartitionMismatch(String),
    /// A block-local closure or a reduction failed.
    #[error("aggregation failed in {stage}: {source}")]
    AggregationFailure {
        stage: String,
        #[source]
        source: ThreadSafeStdError,
    },
    /// A local dense kernel (Cholesky, SVD, ...) failed on an in-core matrix.
    #[error("local kernel `{operation}` failed: {source}")]
    LocalKernel {
        operation: &'static str,
        #[source]
        source: ThreadSafeStdError,
    },
    /// Saving or loading a partitioned matrix failed.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, DecompositionError>;

/// Non-fatal diagnostics attached to decomposition outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum DecompositionWarning {
    /// Captured energy ‖AᵗQ‖²_F dropped between two consecutive passes.
    NumericDivergence {
        iteration: usize,
        previous_energy: f64,
        current_energy: f64,
    },
    /// Thin QR fell back to factoring `G + delta·I`.
    RankRegularized { delta: f64 },
}

impl fmt::Display for DecompositionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecompositionWarning::NumericDivergence {
                iteration,
                previous_energy,
                current_energy,
            } => write!(
                f,
                "captured energy decreased at power iteration {}: {:.6e} -> {:.6e}",
                iteration, previous_energy, current_energy
            ),
            DecompositionWarning::RankRegularized { delta } => {
                write!(f, "Gram matrix regularized with delta = {:.3e}", delta)
            }
        }
    }
}
