//! Observation models `p(y | f)`.
//!
//! Function samples come in as `[R, n, N]` (latent output, datum, draw)
//! and observations as `[n, R]`.

mod bernoulli;
mod gaussian;
mod poisson;

pub use bernoulli::BernoulliLikelihood;
pub use gaussian::GaussianLikelihood;
pub use poisson::PoissonLikelihood;

use candle_core::Tensor;

use crate::error::Result;

pub trait Likelihood {
    /// Pointwise log density `log p(y | f)`.
    ///
    /// # Arguments
    /// * `f` - function samples, shape `[R, n, N]`
    /// * `y` - observations, shape `[n, R]`
    ///
    /// # Returns
    /// Log densities broadcast to `[R, n, N]`; callers sum them.
    fn logp(&self, f: &Tensor, y: &Tensor) -> Result<Tensor>;

    /// Predictive mean and variance of `y` given `f ~ N(fmu, fvar)`,
    /// all shaped `[n, R]`.
    fn predict_mean_and_var(&self, fmu: &Tensor, fvar: &Tensor) -> Result<(Tensor, Tensor)>;
}

impl<L: Likelihood + ?Sized> Likelihood for Box<L> {
    fn logp(&self, f: &Tensor, y: &Tensor) -> Result<Tensor> {
        (**self).logp(f, y)
    }

    fn predict_mean_and_var(&self, fmu: &Tensor, fvar: &Tensor) -> Result<(Tensor, Tensor)> {
        (**self).predict_mean_and_var(fmu, fvar)
    }
}

/// `[n, R]` observations as `[R, n, 1]` in the dtype of `f`
fn align_observations(y: &Tensor, f: &Tensor) -> Result<Tensor> {
    Ok(y.to_dtype(f.dtype())?.t()?.unsqueeze(2)?)
}
