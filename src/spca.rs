// src/spca.rs

use crate::config::DecompositionConfig;
use crate::error::{DecompositionError, DecompositionWarning, Result};
use crate::linalg_backends::{LocalLinAlg, NdarrayLinAlgBackend};
use crate::partitioned::{PartitionedMatrix, PersistLevel};
use crate::projection::{GaussianProjection, RandomProjection};
use crate::ssvd::sketched_svd;
use log::{debug, info};
use ndarray::{Array1, Array2, Axis};

/// Result of a stochastic PCA of the column-centered input.
#[derive(Debug, Clone)]
pub struct PcaOutput {
    /// Principal component scores, m x k: the centered rows projected on the loadings
    /// (`U * diag(s)`). Carries the input's partitioning tag.
    pub scores: PartitionedMatrix,
    /// Principal axes, n x k, in core. Columns are orthonormal.
    pub loadings: Array2<f64>,
    /// Singular values of the centered data, descending, length k.
    pub singular_values: Array1<f64>,
    /// Column means ξ used for the implicit centering, length n.
    pub column_means: Array1<f64>,
    /// Variance along each component: `s^2 / (m - 1)`.
    pub explained_variance: Array1<f64>,
    pub sketch_dimension: usize,
    pub warnings: Vec<DecompositionWarning>,
}

/// Stochastic PCA: a stochastic SVD of `A - 1 ξ^T` where the centered matrix is never
/// materialized, so sparse-looking inputs stay as they are.
///
/// Costs one extra barrier over stochastic SVD, for the column means.
#[derive(Debug, Clone)]
pub struct StochasticPca<B = NdarrayLinAlgBackend> {
    config: DecompositionConfig,
    backend: B,
}

impl StochasticPca<NdarrayLinAlgBackend> {
    pub fn new(config: DecompositionConfig) -> Self {
        Self {
            config,
            backend: NdarrayLinAlgBackend,
        }
    }
}

impl<B: LocalLinAlg> StochasticPca<B> {
    pub fn with_backend<B2: LocalLinAlg>(self, backend: B2) -> StochasticPca<B2> {
        StochasticPca {
            config: self.config,
            backend,
        }
    }

    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    pub fn compute(&self, a: &PartitionedMatrix) -> Result<PcaOutput> {
        self.compute_with_projection(a, &GaussianProjection::new(self.config.random_seed))
    }

    pub fn compute_with_projection<P: RandomProjection>(
        &self,
        a: &PartitionedMatrix,
        projection: &P,
    ) -> Result<PcaOutput> {
        self.config.validate()?;
        let (num_rows, num_cols) = a.dim();
        let start_time = std::time::Instant::now();
        info!(
            "Starting stochastic PCA of {}x{} matrix over {} partitions. k={}, p={}, q={}",
            num_rows,
            num_cols,
            a.num_partitions(),
            self.config.target_rank,
            self.config.oversampling,
            self.config.power_iterations
        );
        if num_rows < 2 {
            return Err(DecompositionError::Configuration(
                "Input matrix must have at least 2 rows for PCA.".to_string(),
            ));
        }
        if num_cols == 0 {
            return Err(DecompositionError::Configuration(
                "Input matrix must have at least 1 column for PCA.".to_string(),
            ));
        }

        a.persist(PersistLevel::MemoryOnly);
        let column_means = column_means(a)?;
        debug!("Computed column means over {} rows.", num_rows);

        // Centering removes one degree of freedom from the row space.
        let max_rank = (num_rows - 1).min(num_cols);
        let sketch = sketched_svd(a, &self.config, &self.backend, projection, Some(&column_means), max_rank)?;

        let singular_values = sketch.singular_values;
        let scores = sketch.u.map_block(|u_block| Ok(&u_block * &singular_values))?;
        let explained_variance = singular_values.mapv(|s| s * s / (num_rows as f64 - 1.0));

        info!(
            "Stochastic PCA completed in {:?}. Computed {} components.",
            start_time.elapsed(),
            singular_values.len()
        );
        Ok(PcaOutput {
            scores,
            loadings: sketch.v,
            singular_values,
            column_means,
            explained_variance,
            sketch_dimension: sketch.sketch_dimension,
            warnings: sketch.warnings,
        })
    }
}

/// `stochastic_pca(A, k, p, q, seed) -> (scores, loadings, s)` with the default backend.
pub fn stochastic_pca(
    a: &PartitionedMatrix,
    target_rank: usize,
    oversampling: usize,
    power_iterations: usize,
    random_seed: u64,
) -> Result<PcaOutput> {
    StochasticPca::new(DecompositionConfig::new(target_rank, oversampling, power_iterations, random_seed)).compute(a)
}

/// Global column mean ξ, one barrier.
pub fn column_means(a: &PartitionedMatrix) -> Result<Array1<f64>> {
    if a.nrows() == 0 {
        return Err(DecompositionError::Configuration(
            "cannot take column means of a matrix with no rows".to_string(),
        ));
    }
    let sums = a.all_reduce_small(|block| Ok(block.sum_axis(Axis(0))), |left, right| left + right)?;
    Ok(sums / a.nrows() as f64)
}
