//! Square-root factor `S` of the whitened variational covariance `S Sᵀ`.
//!
//! Each variant keeps its own raw parameter and knows how to
//! 1. expand itself into a dense `[R, n, n]` lower-triangular tensor,
//! 2. compute `logdet(S Sᵀ) = Σ log diag(S)²`,
//! 3. apply itself to standard normal draws, `S v`.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;

use crate::config::CovarianceStructure;
use crate::error::{Result, StvgpError};
use crate::linalg;
use crate::param::{Param, Transform};

pub enum QSqrt {
    /// positive scales, raw shape `[R, n]`
    Diagonal { raw: Param },
    /// raw shape `[R, n, n]`, upper triangle ignored
    FullRank { raw: Param },
    /// raw shape `[R, n, k]`, column `k - 1` is the main diagonal
    Banded { raw: Param, bandwidth: usize },
}

impl QSqrt {
    /// Allocate the raw parameter for `structure`, initialised so that the
    /// dense factor is the identity.
    pub fn new(
        varmap: &VarMap,
        name: &str,
        structure: CovarianceStructure,
        num_latent: usize,
        num_data: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let (r, n) = (num_latent, num_data);
        match structure {
            CovarianceStructure::Diagonal => {
                let init = Tensor::ones((r, n), dtype, device)?;
                let raw = Param::new(varmap, name, &init, Transform::Positive)?;
                Ok(QSqrt::Diagonal { raw })
            }
            CovarianceStructure::FullRank => {
                let init = linalg::eye(n, dtype, device)?
                    .unsqueeze(0)?
                    .broadcast_as((r, n, n))?
                    .contiguous()?;
                let raw = Param::new(varmap, name, &init, Transform::Identity)?;
                Ok(QSqrt::FullRank { raw })
            }
            CovarianceStructure::Banded(k) => {
                structure.validate(n)?;
                let zeros = Tensor::zeros((r, n, k - 1), dtype, device)?;
                let ones = Tensor::ones((r, n, 1), dtype, device)?;
                let init = Tensor::cat(&[&zeros, &ones], 2)?;
                let raw = Param::new(varmap, name, &init, Transform::Identity)?;
                Ok(QSqrt::Banded { raw, bandwidth: k })
            }
        }
    }

    pub fn structure(&self) -> CovarianceStructure {
        match self {
            QSqrt::Diagonal { .. } => CovarianceStructure::Diagonal,
            QSqrt::FullRank { .. } => CovarianceStructure::FullRank,
            QSqrt::Banded { bandwidth, .. } => CovarianceStructure::Banded(*bandwidth),
        }
    }

    pub fn raw(&self) -> &Param {
        match self {
            QSqrt::Diagonal { raw } | QSqrt::FullRank { raw } | QSqrt::Banded { raw, .. } => raw,
        }
    }

    pub fn var(&self) -> &Var {
        self.raw().var()
    }

    /// Dense lower-triangular factor, `[R, n, n]`
    pub fn dense(&self) -> Result<Tensor> {
        match self {
            QSqrt::Diagonal { raw } => linalg::batch_diag(&raw.value()?),
            QSqrt::FullRank { raw } => lower_triangular(&raw.value()?),
            QSqrt::Banded { raw, bandwidth } => band_to_dense(&raw.value()?, *bandwidth),
        }
    }

    /// `Σ log diag(S)²` over all latent outputs
    pub fn log_det(&self) -> Result<Tensor> {
        match self {
            QSqrt::Diagonal { raw } => Ok((raw.value()?.log()?.sum_all()? * 2.0)?),
            QSqrt::FullRank { raw } => {
                let diag = linalg::batch_diag_part(&raw.value()?)?;
                Ok(diag.sqr()?.log()?.sum_all()?)
            }
            QSqrt::Banded { raw, bandwidth } => {
                let diag = raw.value()?.narrow(2, bandwidth - 1, 1)?;
                Ok(diag.sqr()?.log()?.sum_all()?)
            }
        }
    }

    /// `S v` for standard normal draws `v` of shape `[R, n, N]`
    pub fn transform(&self, v: &Tensor) -> Result<Tensor> {
        match self {
            QSqrt::Diagonal { raw } => Ok(raw.value()?.unsqueeze(2)?.broadcast_mul(v)?),
            _ => Ok(self.dense()?.matmul(&v.contiguous()?)?),
        }
    }
}

/// Zero everything above the main diagonal of each `[n, n]` slice.
pub fn lower_triangular(raw: &Tensor) -> Result<Tensor> {
    let n = raw.dim(raw.rank() - 1)?;
    let mask = linalg::lower_mask(n, raw.dtype(), raw.device())?;
    Ok(raw.broadcast_mul(&mask)?)
}

/// Expand a compressed band `[R, n, k]` into a dense `[R, n, n]` factor.
///
/// Row `i` of the band holds the entries of columns `i-k+1 ..= i`; entries
/// that would fall left of column 0 are dropped. Left-padding each row to
/// width `n + 1` and re-reading the flattened buffer with row stride `n`
/// shifts row `i` by `i` columns, which lines the band up with the diagonal.
pub fn band_to_dense(raw: &Tensor, bandwidth: usize) -> Result<Tensor> {
    let (r, n, k) = raw.dims3()?;
    if k != bandwidth || k > n {
        return Err(StvgpError::config(format!(
            "band of width {} cannot describe a {} x {} factor (stored width {})",
            bandwidth, n, n, k
        )));
    }
    let skewed = raw
        .pad_with_zeros(2, n - k + 1, 0)?
        .reshape((r, n * (n + 1)))?
        .narrow(1, n, n * n)?
        .reshape((r, n, n))?;
    lower_triangular(&skewed)
}
