//! Bernoulli likelihood for binary data.

use candle_core::Tensor;

use super::{align_observations, Likelihood};
use crate::error::Result;

/// Bernoulli likelihood with logit link: y ~ Bernoulli(σ(f)), y ∈ {0, 1}
///
/// ```text
/// log p(y | f) = y * f - log(1 + exp(f))
/// ```
#[derive(Default)]
pub struct BernoulliLikelihood;

impl BernoulliLikelihood {
    pub fn new() -> Self {
        Self
    }
}

/// log(1 + exp(f)) = max(f, 0) + log(1 + exp(-|f|))
fn softplus(f: &Tensor) -> Result<Tensor> {
    let tail = ((f.abs()?.neg()?.exp()? + 1.0)?).log()?;
    Ok((f.relu()? + tail)?)
}

impl Likelihood for BernoulliLikelihood {
    fn logp(&self, f: &Tensor, y: &Tensor) -> Result<Tensor> {
        let y = align_observations(y, f)?;
        Ok((f.broadcast_mul(&y)? - softplus(f)?)?)
    }

    fn predict_mean_and_var(&self, fmu: &Tensor, fvar: &Tensor) -> Result<(Tensor, Tensor)> {
        // E[σ(f)] ≈ σ(μ / sqrt(1 + π σ² / 8))
        let kappa = ((fvar * (std::f64::consts::PI / 8.0))? + 1.0)?.sqrt()?;
        let p = candle_nn::ops::sigmoid(&(fmu / kappa)?)?;
        let var = (&p * (p.neg()? + 1.0)?)?;
        Ok((p, var))
    }
}
