// src/thin_qr.rs

use crate::error::{DecompositionError, DecompositionWarning, Result, ThreadSafeStdError};
use crate::linalg_backends::{LocalLinAlg, NdarrayLinAlgBackend};
use crate::partitioned::{PartitionedMatrix, PersistLevel};
use log::{debug, info, trace, warn};
use ndarray::Array2;

/// Relative floor on the pivots of the Gram matrix's Cholesky factor: a pivot below
/// `RANK_DEFICIENCY_TOLERANCE * max pivot` marks the input as numerically rank deficient.
pub const RANK_DEFICIENCY_TOLERANCE: f64 = 1e-6;

/// Initial Gram shift of the fallback, relative to the largest Gram diagonal entry.
const REGULARIZATION_SCALE: f64 = 1e-10;
const MAX_REGULARIZATION_ATTEMPTS: usize = 8;

/// Result of a thin QR: `A = Q * R`.
#[derive(Debug, Clone)]
pub struct ThinQrOutput {
    /// Orthonormal factor, m x n, with the input's partitioning tag.
    pub q: PartitionedMatrix,
    /// Upper-triangular factor, n x n, in core.
    pub r: Array2<f64>,
    /// Shift `delta` added to the Gram diagonal when the regularized fallback was used.
    pub regularization: Option<f64>,
}

impl ThinQrOutput {
    pub fn warnings(&self) -> Vec<DecompositionWarning> {
        self.regularization
            .map(|delta| vec![DecompositionWarning::RankRegularized { delta }])
            .unwrap_or_default()
    }
}

/// Single-pass thin QR of a tall-skinny partitioned matrix through the Cholesky factor
/// of its Gram matrix.
///
/// One barrier (the Gram reduction) and no row movement: each partition computes its own
/// rows of `Q = A * R^-1`. The price is stability, since the Gram matrix squares the
/// condition number of `A`.
///
/// When `check_rank_deficiency` is false and the Gram matrix is numerically singular, the
/// factorization falls back to `G + delta * I` with `delta = 1e-10 * max diag(G)`, growing
/// tenfold per retry. `Q * R = A` still holds; `Q` loses orthonormality only along the
/// numerically null directions, where its columns shrink toward zero.
#[derive(Debug, Clone)]
pub struct ThinQr<B = NdarrayLinAlgBackend> {
    check_rank_deficiency: bool,
    backend: B,
}

impl ThinQr<NdarrayLinAlgBackend> {
    pub fn new(check_rank_deficiency: bool) -> Self {
        Self {
            check_rank_deficiency,
            backend: NdarrayLinAlgBackend,
        }
    }
}

impl<B: LocalLinAlg> ThinQr<B> {
    pub fn with_backend<B2: LocalLinAlg>(self, backend: B2) -> ThinQr<B2> {
        ThinQr {
            check_rank_deficiency: self.check_rank_deficiency,
            backend,
        }
    }

    pub fn compute(&self, a: &PartitionedMatrix) -> Result<ThinQrOutput> {
        let start_time = std::time::Instant::now();
        info!(
            "Starting thin QR of {}x{} matrix over {} partitions (rank check: {}).",
            a.nrows(),
            a.ncols(),
            a.num_partitions(),
            self.check_rank_deficiency
        );
        let output = orthonormalize(a, self.check_rank_deficiency, &self.backend)?;
        info!("Thin QR completed in {:?}.", start_time.elapsed());
        Ok(output)
    }
}

/// `thin_qr(A, check_rank_deficiency) -> (Q, R)` with the default backend.
pub fn thin_qr(a: &PartitionedMatrix, check_rank_deficiency: bool) -> Result<ThinQrOutput> {
    ThinQr::new(check_rank_deficiency).compute(a)
}

pub(crate) fn orthonormalize<B: LocalLinAlg>(
    a: &PartitionedMatrix,
    check_rank_deficiency: bool,
    backend: &B,
) -> Result<ThinQrOutput> {
    let (num_rows, num_cols) = a.dim();
    if num_cols > num_rows {
        return Err(DecompositionError::Configuration(format!(
            "thin QR needs at least as many rows as columns, got {}x{}",
            num_rows, num_cols
        )));
    }
    if num_cols == 0 {
        let q = a.map_block(|block| Ok(Array2::zeros((block.nrows(), 0))))?;
        return Ok(ThinQrOutput {
            q,
            r: Array2::zeros((0, 0)),
            regularization: None,
        });
    }

    // Two passes over A: the Gram reduction and the triangular solves.
    a.persist(PersistLevel::MemoryOnly);

    let gram = a.all_reduce_small(|block| Ok(block.t().dot(&block)), |left, right| left + right)?;
    trace!("Thin QR: reduced {}x{} Gram matrix.", gram.nrows(), gram.ncols());

    let (lower, regularization) = factor_gram(&gram, check_rank_deficiency, backend)?;
    let lower = zero_strict_upper(lower);

    // Q_i = A_i * L^-T, solved as L * Q_i^T = A_i^T.
    let q = a.map_block(|block| {
        if block.nrows() == 0 {
            return Ok(Array2::zeros((0, num_cols)));
        }
        let rhs = block.t().as_standard_layout().into_owned();
        let solved = backend.solve_lower_triangular(&lower, &rhs)?;
        Ok(solved.reversed_axes())
    })?;

    let r = lower.t().as_standard_layout().into_owned();
    Ok(ThinQrOutput { q, r, regularization })
}

fn factor_gram<B: LocalLinAlg>(
    gram: &Array2<f64>,
    check_rank_deficiency: bool,
    backend: &B,
) -> Result<(Array2<f64>, Option<f64>)> {
    match backend.cholesky_lower(gram) {
        Ok(lower) => match weak_pivot(&lower) {
            None => return Ok((lower, None)),
            Some(reason) if check_rank_deficiency => return Err(DecompositionError::RankDeficiency(reason)),
            Some(reason) => debug!("Thin QR: {}; falling back to a regularized factorization.", reason),
        },
        Err(e) if check_rank_deficiency => {
            return Err(DecompositionError::RankDeficiency(format!(
                "Cholesky factorization of the Gram matrix failed: {}",
                e
            )))
        }
        Err(e) => debug!(
            "Thin QR: Cholesky of the Gram matrix failed ({}); falling back to a regularized factorization.",
            e
        ),
    }
    regularized_factor(gram, backend)
}

fn weak_pivot(lower: &Array2<f64>) -> Option<String> {
    let diag = lower.diag();
    let max_pivot = diag.iter().fold(0.0_f64, |acc, &d| acc.max(d.abs()));
    if !max_pivot.is_finite() || max_pivot <= 0.0 {
        return Some(format!("Cholesky factor has no usable pivot (max pivot {:.3e})", max_pivot));
    }
    let threshold = RANK_DEFICIENCY_TOLERANCE * max_pivot;
    diag.iter()
        .position(|&d| !d.is_finite() || d < threshold)
        .map(|column| {
            format!(
                "pivot {} of the Cholesky factor is {:.3e}, below the threshold {:.3e}",
                column, diag[column], threshold
            )
        })
}

fn regularized_factor<B: LocalLinAlg>(gram: &Array2<f64>, backend: &B) -> Result<(Array2<f64>, Option<f64>)> {
    let n = gram.nrows();
    let scale = gram.diag().iter().fold(0.0_f64, |acc, &d| acc.max(d));
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    let mut delta = REGULARIZATION_SCALE * scale;
    let mut last_error: Option<ThreadSafeStdError> = None;

    for attempt in 0..MAX_REGULARIZATION_ATTEMPTS {
        let shifted = gram + &(Array2::<f64>::eye(n) * delta);
        match backend.cholesky_lower(&shifted) {
            Ok(lower) => match weak_pivot(&lower) {
                None => {
                    warn!(
                        "Thin QR: Gram matrix is numerically singular; regularized with delta = {:.3e} after {} attempt(s).",
                        delta,
                        attempt + 1
                    );
                    return Ok((lower, Some(delta)));
                }
                Some(reason) => last_error = Some(reason.into()),
            },
            Err(e) => last_error = Some(e),
        }
        delta *= 10.0;
    }

    Err(DecompositionError::LocalKernel {
        operation: "cholesky",
        source: last_error.unwrap_or_else(|| "regularized factorization did not converge".into()),
    })
}

fn zero_strict_upper(mut lower: Array2<f64>) -> Array2<f64> {
    for ((row, col), value) in lower.indexed_iter_mut() {
        if col > row {
            *value = 0.0;
        }
    }
    lower
}
