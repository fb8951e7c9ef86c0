// src/config.rs

use crate::error::{DecompositionError, Result};
use serde::{Deserialize, Serialize};

/// Parameters shared by the stochastic SVD and stochastic PCA runners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Number of singular triplets / principal components to return (k).
    pub target_rank: usize,
    /// Extra random projection columns beyond `target_rank` (p). The sketch has `k + p` columns.
    pub oversampling: usize,
    /// Number of power iterations (q). Each one adds a pass and a barrier over the input.
    pub power_iterations: usize,
    /// Seed of the random projection matrix Ω.
    pub random_seed: u64,
    /// Fail with `RankDeficiency` instead of regularizing when a thin QR meets a singular Gram matrix.
    pub check_rank_deficiency: bool,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        DecompositionConfig {
            target_rank: 10,
            oversampling: 10,
            power_iterations: 2,
            random_seed: 2025,
            check_rank_deficiency: false,
        }
    }
}

impl DecompositionConfig {
    pub fn new(target_rank: usize, oversampling: usize, power_iterations: usize, random_seed: u64) -> Self {
        Self {
            target_rank,
            oversampling,
            power_iterations,
            random_seed,
            ..Self::default()
        }
    }

    pub fn with_rank_check(mut self, check_rank_deficiency: bool) -> Self {
        self.check_rank_deficiency = check_rank_deficiency;
        self
    }

    /// Checks the invariants k > 0 (p and q are unsigned).
    pub fn validate(&self) -> Result<()> {
        if self.target_rank == 0 {
            return Err(DecompositionError::Configuration(
                "target rank (k) must be greater than 0".to_string(),
            ));
        }
        if self.target_rank.checked_add(self.oversampling).is_none() {
            return Err(DecompositionError::Configuration(format!(
                "target rank ({}) plus oversampling ({}) overflows",
                self.target_rank, self.oversampling
            )));
        }
        Ok(())
    }

    /// Sketch width `l = k + p` clamped to `max_rank`, never below `min(k, max_rank)`.
    pub fn sketch_dimension(&self, max_rank: usize) -> usize {
        let ideal = self.target_rank.saturating_add(self.oversampling);
        ideal.min(max_rank).max(self.target_rank.min(max_rank))
    }
}
