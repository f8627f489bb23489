// src/linalg_backends.rs

use ndarray::{Array1, Array2};

use crate::error::ThreadSafeStdError;

/// Output of a Singular Value Decomposition.
///
/// Singular values are in descending order.
#[derive(Debug)]
pub struct SVDOutput {
    pub u: Option<Array2<f64>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Trait for QR decomposition, focusing on retrieving the thin Q factor.
/// For an m×n input the Q factor is m×min(m, n).
pub trait BackendQR {
    fn qr_q_r(&self, matrix: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), ThreadSafeStdError>;
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput, ThreadSafeStdError>;
}

// --- ndarray-linalg (LAPACK) backend ---
use ndarray_linalg::{SVDInto as NdLinalgSVDInto, QR as NdLinalgQR};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendQR for NdarrayLinAlgBackend {
    fn qr_q_r(&self, matrix: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), ThreadSafeStdError> {
        matrix.qr().map_err(to_dyn_error)
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput, ThreadSafeStdError> {
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

// --- faer backend ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendQR, BackendSVD, SVDOutput};
    use crate::error::ThreadSafeStdError;
    use faer::linalg::solvers::Svd as FaerSolverSvd;
    use faer::MatRef;
    use ndarray::{Array1, Array2, ShapeBuilder};

    fn to_dyn_error_faer(msg: String) -> ThreadSafeStdError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray(faer_mat: MatRef<'_, f64>) -> Array2<f64> {
        let nrows = faer_mat.nrows();
        let ncols = faer_mat.ncols();
        let mut data_vec = Vec::with_capacity(nrows * ncols);
        for j in 0..ncols {
            for i in 0..nrows {
                data_vec.push(faer_mat[(i, j)]);
            }
        }
        Array2::from_shape_vec((nrows, ncols).f(), data_vec)
            .unwrap_or_else(|_| Array2::zeros((nrows, ncols)))
    }

    /// Views an ndarray matrix as a faer matrix. faer requires contiguous
    /// storage, so non-contiguous inputs are rejected.
    fn with_faer_view<R>(
        matrix: &Array2<f64>,
        f: impl FnOnce(MatRef<'_, f64>) -> Result<R, ThreadSafeStdError>,
    ) -> Result<R, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        let slice = matrix.as_slice_memory_order().ok_or_else(|| {
            to_dyn_error_faer(format!(
                "Input ndarray matrix ({}x{}) is non-contiguous and cannot be directly viewed by faer.",
                nrows, ncols
            ))
        })?;
        if matrix.is_standard_layout() {
            f(MatRef::from_row_major_slice(slice, nrows, ncols))
        } else {
            f(MatRef::from_column_major_slice(slice, nrows, ncols))
        }
    }

    impl BackendQR for FaerLinAlgBackend {
        fn qr_q_r(&self, matrix: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), ThreadSafeStdError> {
            let (nrows, ncols) = matrix.dim();
            let k = nrows.min(ncols);
            if matrix.is_empty() {
                return Ok((Array2::zeros((nrows, k)), Array2::zeros((k, ncols))));
            }
            with_faer_view(matrix, |view| {
                let qr_decomp = view.qr();
                let q = faer_mat_to_ndarray(qr_decomp.compute_thin_Q().as_ref());
                let r = faer_mat_to_ndarray(qr_decomp.thin_R());
                Ok((q, r))
            })
        }
    }

    impl BackendSVD for FaerLinAlgBackend {
        fn svd_into(
            &self,
            matrix: Array2<f64>,
            compute_u: bool,
            compute_v: bool,
        ) -> Result<SVDOutput, ThreadSafeStdError> {
            let (nrows, ncols) = matrix.dim();
            if matrix.is_empty() {
                let k_dim = nrows.min(ncols);
                return Ok(SVDOutput {
                    u: compute_u.then(|| Array2::zeros((nrows, k_dim))),
                    s: Array1::zeros(k_dim),
                    vt: compute_v.then(|| Array2::zeros((k_dim, ncols))),
                });
            }
            with_faer_view(&matrix, |view| {
                let svd = FaerSolverSvd::new_thin(view)
                    .map_err(|e| to_dyn_error_faer(format!("Faer SVD computation failed: {:?}", e)))?;
                let diag = svd.S().column_vector();
                let s = Array1::from_iter((0..diag.nrows()).map(|i| diag[i]));
                let u = compute_u.then(|| faer_mat_to_ndarray(svd.U()));
                let vt = compute_v.then(|| faer_mat_to_ndarray(svd.V()).t().into_owned());
                Ok(SVDOutput { u, s, vt })
            })
        }
    }
}

/// Dispatches to the linear algebra backend selected by Cargo features.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider;

impl LinAlgBackendProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendQR for LinAlgBackendProvider {
    fn qr_q_r(&self, matrix: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), ThreadSafeStdError> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.qr_q_r(matrix)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.qr_q_r(matrix)
        }
    }
}

impl BackendSVD for LinAlgBackendProvider {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput, ThreadSafeStdError> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.svd_into(matrix, compute_u, compute_v)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
        }
    }
}
