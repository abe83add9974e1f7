//! Bridge between candle tensors and `nalgebra` for the dense
//! factorisations candle does not provide (Cholesky, triangular solves).
//!
//! Everything here runs on the host in `f64` and returns constants, i.e.
//! no gradient flows through these results.

use candle_core::{DType, Device, Tensor};
use nalgebra::DMatrix;

use crate::error::{Result, StvgpError};

/// Diagonal jitter added to kernel matrices before factorisation
pub const JITTER: f64 = 1e-6;

/// Copy a 2D tensor into a row-major `DMatrix<f64>`
pub fn to_dmatrix(t: &Tensor) -> Result<DMatrix<f64>> {
    let (nrow, ncol) = t.dims2()?;
    let data = t.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
    Ok(DMatrix::from_row_slice(nrow, ncol, &data))
}

/// Copy a `DMatrix<f64>` back into a 2D tensor of the requested dtype
pub fn from_dmatrix(mat: &DMatrix<f64>, dtype: DType, device: &Device) -> Result<Tensor> {
    let (nrow, ncol) = mat.shape();
    let data: Vec<f64> = (0..nrow)
        .flat_map(|i| (0..ncol).map(move |j| mat[(i, j)]))
        .collect();
    Ok(Tensor::from_vec(data, (nrow, ncol), device)?.to_dtype(dtype)?)
}

/// Lower Cholesky factor of `kk + jitter * I`
pub fn cholesky_jittered(kk: &DMatrix<f64>, jitter: f64) -> Result<DMatrix<f64>> {
    let n = kk.nrows();
    let kk = kk + DMatrix::<f64>::identity(n, n) * jitter;
    kk.cholesky().map(|chol| chol.l()).ok_or_else(|| {
        StvgpError::Numerical(format!(
            "kernel matrix ({} x {}) is not positive definite",
            n, n
        ))
    })
}

/// Solve `L a = b` for lower-triangular `L`
pub fn solve_lower(ll: &DMatrix<f64>, bb: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    ll.solve_lower_triangular(bb)
        .ok_or_else(|| StvgpError::Numerical("singular triangular system".to_string()))
}

/// `n x n` identity
pub fn eye(n: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    from_dmatrix(&DMatrix::<f64>::identity(n, n), dtype, device)
}

/// `n x n` matrix of ones on and below the main diagonal, zeros above
pub fn lower_mask(n: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mask = DMatrix::<f64>::from_fn(n, n, |i, j| if j <= i { 1.0 } else { 0.0 });
    from_dmatrix(&mask, dtype, device)
}

/// Diagonal of each matrix in a batch: `[R, n, n] -> [R, n]`
pub fn batch_diag_part(s: &Tensor) -> Result<Tensor> {
    let (_, n, _) = s.dims3()?;
    let eye = eye(n, s.dtype(), s.device())?;
    Ok(s.broadcast_mul(&eye)?.sum(2)?)
}

/// Embed vectors as diagonals: `[R, n] -> [R, n, n]`
pub fn batch_diag(d: &Tensor) -> Result<Tensor> {
    let (_, n) = d.dims2()?;
    let eye = eye(n, d.dtype(), d.device())?;
    Ok(d.unsqueeze(2)?.broadcast_mul(&eye)?)
}
