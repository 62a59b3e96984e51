// src/linalg_backends.rs

use log::warn;
use ndarray::{s, Array1, Array2, Axis};
use ndarray_linalg::{Eigh as NdLinalgEigh, JobSvd, SVDDCInto as NdLinalgSVDDCInto, UPLO};
use std::error::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Relative cutoff below which singular values are treated as zero by [`pinv`].
pub const PINV_RCOND: f64 = 1e-15;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues, typically sorted in ascending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<f64>,
}

/// Output of a thin Singular Value Decomposition of an (m × n) matrix, r = min(m, n).
#[derive(Debug)]
pub struct SVDOutput {
    /// Left singular vectors, (m × r).
    pub u: Array2<f64>,
    /// Singular values in descending order, (r).
    pub s: Array1<f64>,
    /// Right singular vectors as rows, (r × n).
    pub vt: Array2<f64>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVR or DSYEVD).
/// Implementers will typically expect `matrix` to be symmetric.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError>;
}

/// Trait for thin Singular Value Decomposition.
pub trait BackendSVD {
    fn thin_svd(&self, matrix: Array2<f64>) -> Result<SVDOutput, ThreadSafeStdError>;
}

/// LAPACK-backed implementation over `ndarray-linalg`. The LAPACK provider is
/// chosen by the `backend_*` Cargo features.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendEigh for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
        if matrix.nrows() != matrix.ncols() {
            return Err("Matrix must be square for eigendecomposition.".into());
        }
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput {
            eigenvalues,
            eigenvectors,
        })
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn thin_svd(&self, matrix: Array2<f64>) -> Result<SVDOutput, ThreadSafeStdError> {
        let rank = matrix.nrows().min(matrix.ncols());
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err("SVD input contains non-finite values.".into());
        }
        // JobSvd::Some keeps U at (m × r) and V^T at (r × n)
        let (u, s, vt) = matrix.svddc_into(JobSvd::Some).map_err(to_dyn_error)?;
        let u = u.ok_or("SVD did not return U.")?;
        let vt = vt.ok_or("SVD did not return V^T.")?;
        Ok(SVDOutput {
            u: u.slice(s![.., ..rank]).to_owned(),
            s,
            vt: vt.slice(s![..rank, ..]).to_owned(),
        })
    }
}

/// Moore-Penrose pseudo-inverse.
///
/// Singular values at or below `PINV_RCOND * max(s)` are dropped. If the SVD
/// fails and the input is symmetric, the eigendecomposition is used instead
/// (|eigenvalue| plays the role of the singular value).
pub fn pinv<B: BackendSVD + BackendEigh>(
    backend: &B,
    matrix: &Array2<f64>,
) -> Result<Array2<f64>, ThreadSafeStdError> {
    let (m, n) = matrix.dim();
    if m == 0 || n == 0 {
        return Ok(Array2::zeros((n, m)));
    }
    match backend.thin_svd(matrix.to_owned()) {
        Ok(SVDOutput { u, s, vt }) => {
            let cutoff = PINV_RCOND * s.iter().cloned().fold(0.0, f64::max);
            let s_inv = s.mapv(|v| if v > cutoff { 1.0 / v } else { 0.0 });
            // V · diag(1/s) · U^T
            let v_scaled = &vt.t() * &s_inv.view().insert_axis(Axis(0));
            Ok(v_scaled.dot(&u.t()))
        }
        Err(svd_err) => {
            let symmetric = m == n
                && (0..m).all(|i| (0..i).all(|j| matrix[[i, j]] == matrix[[j, i]]));
            if !symmetric {
                return Err(svd_err);
            }
            warn!(
                "SVD failed in pseudo-inverse ({}); using eigendecomposition of the symmetric input.",
                svd_err
            );
            let EighOutput {
                eigenvalues,
                eigenvectors,
            } = backend.eigh_upper(matrix)?;
            let cutoff = PINV_RCOND * eigenvalues.iter().fold(0.0, |a: f64, v| a.max(v.abs()));
            let inv = eigenvalues.mapv(|v| if v.abs() > cutoff { 1.0 / v } else { 0.0 });
            let scaled = &eigenvectors * &inv.view().insert_axis(Axis(0));
            Ok(scaled.dot(&eigenvectors.t()))
        }
    }
}
