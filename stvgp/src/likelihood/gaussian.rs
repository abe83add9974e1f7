//! Gaussian likelihood for continuous data.

use candle_core::Tensor;

use super::{align_observations, Likelihood};
use crate::error::{Result, StvgpError};

/// Fixed-variance Gaussian likelihood: y ~ N(f, σ²)
pub struct GaussianLikelihood {
    variance: f64,
    log_2pi_var: f64,
}

impl GaussianLikelihood {
    pub fn new(variance: f64) -> Result<Self> {
        if !(variance > 0.0) {
            return Err(StvgpError::config(format!(
                "Gaussian noise variance must be positive, got {}",
                variance
            )));
        }
        Ok(Self {
            variance,
            log_2pi_var: (2.0 * std::f64::consts::PI * variance).ln(),
        })
    }
}

impl Likelihood for GaussianLikelihood {
    fn logp(&self, f: &Tensor, y: &Tensor) -> Result<Tensor> {
        // log N(y; f, σ²) = -0.5 * [log(2πσ²) + (y - f)²/σ²]
        let y = align_observations(y, f)?;
        let diff_sq = f.broadcast_sub(&y)?.sqr()?;
        Ok(((diff_sq * (-0.5 / self.variance))? - 0.5 * self.log_2pi_var)?)
    }

    fn predict_mean_and_var(&self, fmu: &Tensor, fvar: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((fmu.clone(), (fvar + self.variance)?))
    }
}
