// src/diagnostics.rs

use crate::partitioned::PartitionedMatrix;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Computes the Frobenius norm of a matrix.
pub fn compute_frob_norm_f64(matrix: &ArrayView2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Computes orthogonality error ||I - Q^T Q||_F.
pub fn compute_orthogonality_error_f64(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let identity = Array2::<f64>::eye(qtq.nrows());
    let diff = identity - qtq;
    Some(compute_frob_norm_f64(&diff.view()))
}

/// Largest entry of |I - Q^T Q|, i.e. the worst deviation of a column norm from 1 or of
/// a column pair's inner product from 0.
pub fn compute_max_orthogonality_deviation_f64(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let worst = qtq
        .indexed_iter()
        .map(|((i, j), &v)| if i == j { (v - 1.0).abs() } else { v.abs() })
        .fold(0.0_f64, f64::max);
    Some(worst)
}

/// Computes SVD reconstruction error ||A - U diag(s) V^T||_F / ||A||_F.
/// `v` holds right singular vectors as columns.
pub fn compute_svd_reconstruction_error_f64(
    original_matrix: &ArrayView2<f64>,
    u: &ArrayView2<f64>,
    s_vec: &ArrayView1<f64>,
    v: &ArrayView2<f64>,
) -> Option<f64> {
    if original_matrix.is_empty() {
        return None;
    }
    if u.ncols() != s_vec.len() || s_vec.len() != v.ncols() {
        return None;
    }
    if u.nrows() != original_matrix.nrows() || v.nrows() != original_matrix.ncols() {
        return None;
    }

    let s_diag = Array2::from_diag(s_vec);
    let reconstructed_matrix = u.dot(&s_diag).dot(&v.t());
    let diff = original_matrix - &reconstructed_matrix;
    relative_error(compute_frob_norm_f64(&diff.view()), compute_frob_norm_f64(original_matrix))
}

/// Computes ||A - Q R||_F / ||A||_F for a thin QR of a partitioned matrix.
/// Rows are compared block by block, so `q` must be zip-compatible with `a`.
pub fn compute_qr_reconstruction_error(a: &PartitionedMatrix, q: &PartitionedMatrix, r: &Array2<f64>) -> Option<f64> {
    if a.nrows() == 0 || a.ncols() == 0 || q.ncols() != r.nrows() || r.ncols() != a.ncols() {
        return None;
    }
    let zipped = a.zip(q).ok()?;
    let (diff_sq, norm_sq) = zipped
        .all_reduce_small(
            |a_block, q_block| {
                let diff = &a_block - &q_block.dot(r);
                Ok((
                    diff.iter().map(|&x| x * x).sum::<f64>(),
                    a_block.iter().map(|&x| x * x).sum::<f64>(),
                ))
            },
            |(d_l, n_l), (d_r, n_r)| (d_l + d_r, n_l + n_r),
        )
        .ok()?;
    relative_error(diff_sq.sqrt(), norm_sq.sqrt())
}

fn relative_error(norm_diff: f64, norm_original: f64) -> Option<f64> {
    if norm_original < 1e-12 {
        // Original matrix is close to zero
        if norm_diff < 1e-12 {
            Some(0.0)
        } else {
            Some(f64::INFINITY)
        }
    } else {
        Some(norm_diff / norm_original)
    }
}
