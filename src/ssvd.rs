// src/ssvd.rs

use crate::config::DecompositionConfig;
use crate::error::{DecompositionError, DecompositionWarning, Result};
use crate::linalg_backends::{LocalLinAlg, NdarrayLinAlgBackend};
use crate::partitioned::{PartitionedMatrix, PersistLevel};
use crate::projection::{GaussianProjection, RandomProjection};
use crate::thin_qr::orthonormalize;
use log::{debug, info, trace, warn};
use ndarray::{s, Array1, Array2, Axis};

/// Relative drop of captured energy between passes that is reported as divergence.
const DIVERGENCE_RELATIVE_TOLERANCE: f64 = 1e-8;

/// Result of a stochastic SVD: `A ≈ U * diag(s) * V^T`.
#[derive(Debug, Clone)]
pub struct SsvdOutput {
    /// Left singular vectors, m x k, with the input's partitioning tag.
    pub u: PartitionedMatrix,
    /// Right singular vectors, n x k, in core.
    pub v: Array2<f64>,
    /// Singular values in descending order, length k.
    pub singular_values: Array1<f64>,
    /// Number of columns of the random sketch (`l`).
    pub sketch_dimension: usize,
    pub warnings: Vec<DecompositionWarning>,
}

/// Randomized SVD over a partitioned matrix.
///
/// Passes over `A`: one for the sketch `A * Ω`, two per power iteration, one for
/// `B = Q^T * A`, plus one per thin QR of the sketch. Barriers: the Gram reduction of each
/// thin QR, one `A^T * Q` reduction per power iteration, and the reduction forming `B`.
#[derive(Debug, Clone)]
pub struct StochasticSvd<B = NdarrayLinAlgBackend> {
    config: DecompositionConfig,
    backend: B,
}

impl StochasticSvd<NdarrayLinAlgBackend> {
    pub fn new(config: DecompositionConfig) -> Self {
        Self {
            config,
            backend: NdarrayLinAlgBackend,
        }
    }
}

impl<B: LocalLinAlg> StochasticSvd<B> {
    pub fn with_backend<B2: LocalLinAlg>(self, backend: B2) -> StochasticSvd<B2> {
        StochasticSvd {
            config: self.config,
            backend,
        }
    }

    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    /// Runs with a Gaussian Ω seeded from `config.random_seed`.
    pub fn compute(&self, a: &PartitionedMatrix) -> Result<SsvdOutput> {
        self.compute_with_projection(a, &GaussianProjection::new(self.config.random_seed))
    }

    pub fn compute_with_projection<P: RandomProjection>(
        &self,
        a: &PartitionedMatrix,
        projection: &P,
    ) -> Result<SsvdOutput> {
        self.config.validate()?;
        let start_time = std::time::Instant::now();
        info!(
            "Starting stochastic SVD of {}x{} matrix over {} partitions. k={}, p={}, q={}",
            a.nrows(),
            a.ncols(),
            a.num_partitions(),
            self.config.target_rank,
            self.config.oversampling,
            self.config.power_iterations
        );
        if a.nrows() == 0 || a.ncols() == 0 {
            return Err(DecompositionError::Configuration(format!(
                "cannot decompose an empty {}x{} matrix",
                a.nrows(),
                a.ncols()
            )));
        }
        let max_rank = a.nrows().min(a.ncols());
        let sketch = sketched_svd(a, &self.config, &self.backend, projection, None, max_rank)?;
        info!(
            "Stochastic SVD completed in {:?}. Computed {} singular triplets.",
            start_time.elapsed(),
            sketch.singular_values.len()
        );
        Ok(SsvdOutput {
            u: sketch.u,
            v: sketch.v,
            singular_values: sketch.singular_values,
            sketch_dimension: sketch.sketch_dimension,
            warnings: sketch.warnings,
        })
    }
}

/// `stochastic_svd(A, k, p, q, seed) -> (U, V, s)` with the default backend and no rank check.
pub fn stochastic_svd(
    a: &PartitionedMatrix,
    target_rank: usize,
    oversampling: usize,
    power_iterations: usize,
    random_seed: u64,
) -> Result<SsvdOutput> {
    StochasticSvd::new(DecompositionConfig::new(target_rank, oversampling, power_iterations, random_seed)).compute(a)
}

pub(crate) struct SketchedSvd {
    pub u: PartitionedMatrix,
    pub v: Array2<f64>,
    pub singular_values: Array1<f64>,
    pub sketch_dimension: usize,
    pub warnings: Vec<DecompositionWarning>,
}

/// Shared core of stochastic SVD and stochastic PCA.
///
/// With `column_means = Some(ξ)` every product is taken against the implicitly centered
/// matrix `A - 1 ξ^T`; the centering is a rank-1 correction applied after each block-local
/// product, so the centered matrix is never formed.
pub(crate) fn sketched_svd<B: LocalLinAlg, P: RandomProjection>(
    a: &PartitionedMatrix,
    config: &DecompositionConfig,
    backend: &B,
    projection: &P,
    column_means: Option<&Array1<f64>>,
    max_rank: usize,
) -> Result<SketchedSvd> {
    let num_cols = a.ncols();
    let mut target_rank = config.target_rank;
    if target_rank > max_rank {
        warn!(
            "Requested rank {} exceeds the attainable rank {}; clamping.",
            target_rank, max_rank
        );
        target_rank = max_rank;
    }
    let sketch_dimension = config.sketch_dimension(max_rank);
    if target_rank == 0 || sketch_dimension == 0 {
        return Err(DecompositionError::Configuration(format!(
            "input {}x{} admits no components (attainable rank {})",
            a.nrows(),
            num_cols,
            max_rank
        )));
    }
    trace!(
        "Sketched SVD: target_k={}, sketch_l={}, centered={}",
        target_rank,
        sketch_dimension,
        column_means.is_some()
    );

    a.persist(PersistLevel::MemoryOnly);
    let mut warnings = Vec::new();

    // Ω: n x l
    let omega = projection.projection_matrix(num_cols, sketch_dimension)?;
    if omega.dim() != (num_cols, sketch_dimension) {
        return Err(DecompositionError::Configuration(format!(
            "projection source returned a {:?} matrix, expected {:?}",
            omega.dim(),
            (num_cols, sketch_dimension)
        )));
    }

    // Y = A * Ω, m x l, aligned with A
    let sketch_y = multiply_right(a, &omega, column_means)?;
    let first_qr = orthonormalize(&sketch_y, config.check_rank_deficiency, backend)?;
    warnings.extend(first_qr.warnings());
    let mut q_basis = first_qr.q;

    let mut previous_energy: Option<f64> = None;
    for iteration in 0..config.power_iterations {
        trace!("Power iteration {}/{}", iteration + 1, config.power_iterations);
        // Z = A^T * Q, n x l
        let z = multiply_transpose(a, &q_basis, column_means)?;
        let energy = z.iter().map(|v| v * v).sum::<f64>();
        check_energy(iteration + 1, previous_energy, energy, &mut warnings);
        previous_energy = Some(energy);

        // Orthonormal basis of Z, computed locally
        let z_basis = backend
            .qr_q_factor(&z)
            .map_err(|source| DecompositionError::LocalKernel { operation: "qr", source })?;

        // Y = A * Z, re-orthonormalized
        let sketch_y = multiply_right(a, &z_basis, column_means)?;
        let refined = orthonormalize(&sketch_y, config.check_rank_deficiency, backend)?;
        warnings.extend(refined.warnings());
        q_basis = refined.q;
    }

    // B = Q^T * A, l x n
    let projected_b = multiply_transpose(a, &q_basis, column_means)?.reversed_axes();
    let final_energy = projected_b.iter().map(|v| v * v).sum::<f64>();
    if config.power_iterations > 0 {
        check_energy(config.power_iterations + 1, previous_energy, final_energy, &mut warnings);
    }
    debug!(
        "Projected matrix B is {}x{}, captured energy {:.6e}.",
        projected_b.nrows(),
        projected_b.ncols(),
        final_energy
    );

    let svd_output_b = backend
        .svd_into(projected_b.as_standard_layout().into_owned(), true, true)
        .map_err(|source| DecompositionError::LocalKernel { operation: "svd", source })?;
    let (u_b, vt_b) = match (svd_output_b.u, svd_output_b.vt) {
        (Some(u_b), Some(vt_b)) => (u_b, vt_b),
        _ => {
            return Err(DecompositionError::LocalKernel {
                operation: "svd",
                source: "SVD of the projected matrix returned no singular vectors".into(),
            })
        }
    };

    let num_k_to_return = target_rank.min(svd_output_b.s.len());
    let u_b_k = u_b.slice(s![.., ..num_k_to_return]).to_owned();
    let v = vt_b.slice(s![..num_k_to_return, ..]).t().to_owned();
    let singular_values = svd_output_b.s.slice(s![..num_k_to_return]).to_owned();

    // U = Q * U_B, aligned with Q and therefore with A
    let u = q_basis.map_block(|q_block| Ok(q_block.dot(&u_b_k)))?;

    Ok(SketchedSvd {
        u,
        v,
        singular_values,
        sketch_dimension,
        warnings,
    })
}

/// `(A - 1 ξ^T) * X`: block-local `A_i * X`, minus the row `ξ^T X` on every row.
fn multiply_right(
    a: &PartitionedMatrix,
    x: &Array2<f64>,
    column_means: Option<&Array1<f64>>,
) -> Result<PartitionedMatrix> {
    let shift = column_means.map(|means| means.dot(x));
    a.map_block(|block| {
        let mut product = block.dot(x);
        if let Some(shift_row) = &shift {
            product -= shift_row;
        }
        Ok(product)
    })
}

/// `(A - 1 ξ^T)^T * Q = A^T Q - ξ (1^T Q)`, reduced over aligned blocks of `A` and `Q`.
fn multiply_transpose(
    a: &PartitionedMatrix,
    q_basis: &PartitionedMatrix,
    column_means: Option<&Array1<f64>>,
) -> Result<Array2<f64>> {
    let zipped = a.zip(q_basis)?;
    match column_means {
        None => zipped.all_reduce_small(|a_block, q_block| Ok(a_block.t().dot(&q_block)), |left, right| left + right),
        Some(means) => {
            let (product, q_column_sums) = zipped.all_reduce_small(
                |a_block, q_block| Ok((a_block.t().dot(&q_block), q_block.sum_axis(Axis(0)))),
                |(product_l, sums_l), (product_r, sums_r)| (product_l + product_r, sums_l + sums_r),
            )?;
            let correction = means
                .view()
                .insert_axis(Axis(1))
                .dot(&q_column_sums.view().insert_axis(Axis(0)));
            Ok(product - correction)
        }
    }
}

fn check_energy(
    iteration: usize,
    previous_energy: Option<f64>,
    current_energy: f64,
    warnings: &mut Vec<DecompositionWarning>,
) {
    if let Some(previous) = previous_energy {
        if current_energy < previous * (1.0 - DIVERGENCE_RELATIVE_TOLERANCE) {
            let warning = DecompositionWarning::NumericDivergence {
                iteration,
                previous_energy: previous,
                current_energy,
            };
            warn!("Stochastic SVD: {}", warning);
            warnings.push(warning);
        }
    }
}
