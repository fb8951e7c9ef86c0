// src/linalg_backends.rs

// --- Common imports needed by multiple sections ---
use crate::error::ThreadSafeStdError;
use ndarray::{Array1, Array2};
use std::error::Error;

// --- Trait Definitions ---
// Kernels run on small in-core matrices only (Gram matrices, sketches, R factors).

/// Trait for Cholesky factorization of a symmetric positive definite matrix.
pub trait BackendCholesky {
    /// Returns the lower-triangular factor `L` with `matrix = L * L^T`.
    fn cholesky_lower(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError>;
}

/// Trait for solving triangular systems.
pub trait BackendTriangularSolve {
    /// Solves `lower * X = rhs` for `X`, reading only the lower triangle of `lower`.
    fn solve_lower_triangular(
        &self,
        lower: &Array2<f64>,
        rhs: &Array2<f64>,
    ) -> Result<Array2<f64>, ThreadSafeStdError>;
}

/// Trait for the orthonormal factor of a QR decomposition.
pub trait BackendQR {
    /// Returns the thin `Q` (m x min(m, n)) of `matrix`.
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError>;
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput {
    pub u: Option<Array2<f64>>,
    /// Singular values in descending order.
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput, ThreadSafeStdError>;
}

/// Everything the decomposition runners need from a local dense backend.
///
/// Backends are shared by reference across worker threads.
pub trait LocalLinAlg: BackendCholesky + BackendTriangularSolve + BackendQR + BackendSVD + Send + Sync {}

impl<T> LocalLinAlg for T where T: BackendCholesky + BackendTriangularSolve + BackendQR + BackendSVD + Send + Sync {}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::{
    Cholesky as NdLinalgCholesky, Diag, SVDInto as NdLinalgSVDInto, SolveTriangular, QR as NdLinalgQR, UPLO,
};

/// LAPACK-backed kernels through `ndarray-linalg`.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendCholesky for NdarrayLinAlgBackend {
    fn cholesky_lower(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(format!(
                "Cholesky requires a square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        if matrix.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        matrix.cholesky(UPLO::Lower).map_err(to_dyn_error)
    }
}

impl BackendTriangularSolve for NdarrayLinAlgBackend {
    fn solve_lower_triangular(
        &self,
        lower: &Array2<f64>,
        rhs: &Array2<f64>,
    ) -> Result<Array2<f64>, ThreadSafeStdError> {
        if lower.nrows() != lower.ncols() || lower.ncols() != rhs.nrows() {
            return Err(format!(
                "Triangular solve dimension mismatch: lhs {}x{}, rhs {}x{}",
                lower.nrows(),
                lower.ncols(),
                rhs.nrows(),
                rhs.ncols()
            )
            .into());
        }
        if rhs.is_empty() {
            return Ok(Array2::zeros(rhs.dim()));
        }
        lower
            .solve_triangular(UPLO::Lower, Diag::NonUnit, rhs)
            .map_err(to_dyn_error)
    }
}

impl BackendQR for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            return Ok(Array2::zeros((nrows, nrows.min(ncols))));
        }
        let (q_factor, _r) = matrix.qr().map_err(to_dyn_error)?;
        Ok(q_factor)
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            let k_dim = nrows.min(ncols);
            return Ok(SVDOutput {
                u: if compute_u { Some(Array2::zeros((nrows, k_dim))) } else { None },
                s: Array1::zeros(k_dim),
                vt: if compute_v { Some(Array2::zeros((k_dim, ncols))) } else { None },
            });
        }
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn cholesky_reconstructs_spd_matrix() {
        let g = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let l = NdarrayLinAlgBackend.cholesky_lower(&g).unwrap();
        let rebuilt = l.dot(&l.t());
        for (a, b) in rebuilt.iter().zip(g.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let g = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(NdarrayLinAlgBackend.cholesky_lower(&g).is_err());
    }

    #[test]
    fn lower_solve_inverts_product() {
        let l = array![[2.0, 0.0], [1.0, 3.0]];
        let x = array![[1.0, -1.0, 0.5], [2.0, 0.0, 4.0]];
        let rhs = l.dot(&x);
        let solved = NdarrayLinAlgBackend.solve_lower_triangular(&l, &rhs).unwrap();
        for (a, b) in solved.iter().zip(x.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn qr_q_factor_is_orthonormal_and_spans_input() {
        let m = array![[1.0, 2.0], [0.0, 1e-3], [3.0, 4.0], [1.0, -1.0]];
        let q = NdarrayLinAlgBackend.qr_q_factor(&m).unwrap();
        assert_eq!(q.dim(), (4, 2));
        let qtq = q.t().dot(&q);
        for ((i, j), v) in qtq.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_approx_eq!(f64, *v, expected, epsilon = 1e-12);
        }
        let projected = q.dot(&q.t().dot(&m));
        for (a, b) in projected.iter().zip(m.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn svd_values_are_descending() {
        let m = array![[3.0, 0.0], [0.0, 5.0], [0.0, 0.0]];
        let out = NdarrayLinAlgBackend.svd_into(m, true, true).unwrap();
        assert_approx_eq!(f64, out.s[0], 5.0, epsilon = 1e-12);
        assert_approx_eq!(f64, out.s[1], 3.0, epsilon = 1e-12);
        assert_eq!(out.u.unwrap().dim(), (3, 3));
        assert_eq!(out.vt.unwrap().dim(), (2, 2));
    }
}
