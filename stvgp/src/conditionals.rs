use candle_core::Tensor;

use crate::error::Result;
use crate::kernels::Kernel;
use crate::linalg::{self, JITTER};

/// Whitened Gaussian conditional `p(f(Xnew) | u)` integrated over
/// `q(u) = N(q_mu, q_sqrt q_sqrtᵀ)` in the coordinates `v = L⁻¹ f(X)`.
///
/// ```text
/// A     = L⁻¹ K(X, Xnew)
/// mean  = Aᵀ q_mu
/// cov   = K(Xnew, Xnew) - Aᵀ A + (Sᵀ A)ᵀ (Sᵀ A)
/// ```
///
/// * `xnew` - prediction inputs, `[m, D]`
/// * `x` - inducing inputs, `[n, D]`
/// * `q_mu` - whitened means, `[R, n]`
/// * `q_sqrt` - dense lower-triangular square roots, `[R, n, n]`
///
/// Returns `(mean, var)` with mean `[m, R]` and var `[m, R]`, or
/// `[m, m, R]` when `full_cov`.
pub fn conditional<K: Kernel + ?Sized>(
    xnew: &Tensor,
    x: &Tensor,
    kern: &K,
    q_mu: &Tensor,
    q_sqrt: &Tensor,
    full_cov: bool,
) -> Result<(Tensor, Tensor)> {
    let (dtype, device) = (q_mu.dtype(), q_mu.device());

    let kmm = linalg::to_dmatrix(&kern.k(x, x)?)?;
    let lm = linalg::cholesky_jittered(&kmm, JITTER)?;
    let kmn = linalg::to_dmatrix(&kern.k(x, xnew)?)?;
    let a_nm = linalg::from_dmatrix(&linalg::solve_lower(&lm, &kmn)?, dtype, device)?;
    let a_mn = a_nm.t()?.contiguous()?;

    let mean = a_mn.matmul(&q_mu.t()?.contiguous()?)?;

    // Sᵀ A for every latent output: [R, n, m]
    let lta = q_sqrt
        .transpose(1, 2)?
        .contiguous()?
        .broadcast_matmul(&a_nm)?;

    let var = if full_cov {
        let knn = kern.k(xnew, xnew)?.to_dtype(dtype)?;
        let base = (knn - a_mn.matmul(&a_nm)?)?;
        let explained = lta.transpose(1, 2)?.contiguous()?.matmul(&lta)?;
        explained
            .broadcast_add(&base)?
            .permute((1, 2, 0))?
            .contiguous()?
    } else {
        let knn = kern.k_diag(xnew)?.to_dtype(dtype)?;
        let base = (knn - a_nm.sqr()?.sum(0)?)?;
        let explained = lta.sqr()?.sum(1)?;
        explained
            .broadcast_add(&base.unsqueeze(0)?)?
            .t()?
            .contiguous()?
    };

    Ok((mean, var))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::Rbf;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn test_prior_recovered_at_identity() -> Result<()> {
        // q_mu = 0, S = I: the whitened posterior equals the prior
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![0.0f64, 0.5, 1.3, 2.0], (4, 1), &device)?;
        let xnew = Tensor::from_vec(vec![0.2f64, 1.1, 3.0], (3, 1), &device)?;
        let kern = Rbf::new(1.3, vec![0.8])?;

        let q_mu = Tensor::zeros((2, 4), DType::F64, &device)?;
        let q_sqrt = linalg::eye(4, DType::F64, &device)?
            .unsqueeze(0)?
            .broadcast_as((2, 4, 4))?
            .contiguous()?;

        let (mean, var) = conditional(&xnew, &x, &kern, &q_mu, &q_sqrt, false)?;
        assert_eq!(mean.dims(), &[3, 2]);
        assert_eq!(var.dims(), &[3, 2]);
        for row in var.to_vec2::<f64>()? {
            for v in row {
                assert_abs_diff_eq!(v, 1.3, epsilon = 1e-6);
            }
        }

        let (_, cov) = conditional(&xnew, &x, &kern, &q_mu, &q_sqrt, true)?;
        assert_eq!(cov.dims(), &[3, 3, 2]);
        let knn = kern.k(&xnew, &xnew)?.to_vec2::<f64>()?;
        let cov = cov.to_vec3::<f64>()?;
        for i in 0..3 {
            for j in 0..3 {
                for r in 0..2 {
                    assert_abs_diff_eq!(cov[i][j][r], knn[i][j], epsilon = 1e-6);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_zero_variance_posterior_at_inducing_points() -> Result<()> {
        // S = 0 at the inducing inputs leaves only jitter-level variance
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![0.0f64, 1.0, 2.5], (3, 1), &device)?;
        let kern = Rbf::new(1.0, vec![1.0])?;
        let q_mu = Tensor::from_vec(vec![0.5f64, -1.0, 2.0], (1, 3), &device)?;
        let q_sqrt = Tensor::zeros((1, 3, 3), DType::F64, &device)?;

        let (_, var) = conditional(&x, &x, &kern, &q_mu, &q_sqrt, false)?;
        for row in var.to_vec2::<f64>()? {
            assert!(row[0].abs() < 1e-5);
        }
        Ok(())
    }
}
