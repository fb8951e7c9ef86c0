// src/projection.rs

use crate::error::{DecompositionError, Result};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Source of the random test matrix Ω used to sketch the range of the input.
///
/// Implementations must be deterministic: the same instance asked twice for the same
/// shape returns the same matrix.
pub trait RandomProjection: Sync {
    /// Returns an `nrows x ncols` projection matrix.
    fn projection_matrix(&self, nrows: usize, ncols: usize) -> Result<Array2<f64>>;
}

/// Standard normal Ω drawn from a ChaCha8 stream seeded with `seed`.
///
/// Entries are filled row by row, so Ω depends only on the seed and its shape,
/// never on how the input matrix is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaussianProjection {
    seed: u64,
}

impl GaussianProjection {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomProjection for GaussianProjection {
    fn projection_matrix(&self, nrows: usize, ncols: usize) -> Result<Array2<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let normal_dist = Normal::new(0.0, 1.0).map_err(|e_normal| {
            DecompositionError::Configuration(format!(
                "Failed to create normal distribution for the random projection: {}",
                e_normal
            ))
        })?;
        Ok(Array2::from_shape_fn((nrows, ncols), |_| normal_dist.sample(&mut rng)))
    }
}
