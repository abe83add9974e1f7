//! Closed-form KL divergences against a whitened prior `N(0, I)`.

use candle_core::Tensor;

use crate::error::Result;
use crate::linalg;

/// KL[ N(μ, S Sᵀ) || N(0, I) ] summed over latent outputs.
///
/// ```text
/// KL = ½ Σ μ² + ½ Σ S² - ½ R n - ½ Σ log diag(S)²
/// ```
///
/// * `q_mu` - means, `[R, n]`
/// * `q_sqrt` - lower-triangular factors, `[R, n, n]`
pub fn gauss_kl_white(q_mu: &Tensor, q_sqrt: &Tensor) -> Result<Tensor> {
    let (r, n) = q_mu.dims2()?;
    let mahalanobis = q_mu.sqr()?.sum_all()?;
    let trace = q_sqrt.sqr()?.sum_all()?;
    let log_det = linalg::batch_diag_part(q_sqrt)?.sqr()?.log()?.sum_all()?;
    let kl = ((mahalanobis + trace)? - log_det)?;
    Ok(((kl - (r * n) as f64)? * 0.5)?)
}

/// Same as [`gauss_kl_white`] for a diagonal factor `q_sqrt` of shape `[R, n]`
pub fn gauss_kl_white_diag(q_mu: &Tensor, q_sqrt: &Tensor) -> Result<Tensor> {
    let (r, n) = q_mu.dims2()?;
    let mahalanobis = q_mu.sqr()?.sum_all()?;
    let q_var = q_sqrt.sqr()?;
    let trace = q_var.sum_all()?;
    let log_det = q_var.log()?.sum_all()?;
    let kl = ((mahalanobis + trace)? - log_det)?;
    Ok(((kl - (r * n) as f64)? * 0.5)?)
}
