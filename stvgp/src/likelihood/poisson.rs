//! Poisson likelihood for count data.

use candle_core::Tensor;
use special::Gamma as SpecialGamma;

use super::{align_observations, Likelihood};
use crate::error::Result;

/// Poisson likelihood with log link: y ~ Poisson(exp(f))
///
/// ```text
/// log p(y | f) = y * f - exp(f) - log(y!)
/// ```
#[derive(Default)]
pub struct PoissonLikelihood;

impl PoissonLikelihood {
    pub fn new() -> Self {
        Self
    }
}

/// log(y!) computed on the host, same shape as `y`
fn log_factorial(y: &Tensor) -> Result<Tensor> {
    let vals = y
        .to_dtype(candle_core::DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?
        .into_iter()
        .map(|y| SpecialGamma::ln_gamma(y + 1.0).0)
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(vals, y.dims(), y.device())?.to_dtype(y.dtype())?)
}

impl Likelihood for PoissonLikelihood {
    fn logp(&self, f: &Tensor, y: &Tensor) -> Result<Tensor> {
        let y = align_observations(y, f)?;
        let y_f = f.broadcast_mul(&y)?;
        let log_prob = (y_f - f.exp()?)?;
        Ok(log_prob.broadcast_sub(&log_factorial(&y)?)?)
    }

    fn predict_mean_and_var(&self, fmu: &Tensor, fvar: &Tensor) -> Result<(Tensor, Tensor)> {
        // exp(f) is log-normal
        let mean = (fmu + (fvar * 0.5)?)?.exp()?;
        let excess = ((fvar.exp()? - 1.0)? * ((fmu * 2.0)? + fvar)?.exp()?)?;
        let var = (&mean + excess)?;
        Ok((mean, var))
    }
}
