use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use log::{debug, info};

use crate::conditionals::conditional;
use crate::config::StvgpConfig;
use crate::error::{Result, StvgpError};
use crate::kernels::Kernel;
use crate::likelihood::Likelihood;
use crate::mean_functions::MeanFunction;
use crate::noise::NoiseSource;
use crate::param::DataHolder;
use crate::posterior::VariationalPosterior;

/// Function-value samples at the training inputs with the KL estimate
/// computed from the same draws.
pub struct PosteriorSample {
    /// `f = L u + m(X)`, shape `[R, n, N]`
    pub f: Tensor,
    /// stochastic KL estimate summed over the N draws (scalar)
    pub kl: Tensor,
}

/// Stochastic variational Gaussian process.
///
/// The variational posterior lives on the latent values at the training
/// inputs in whitened coordinates; the ELBO is estimated by Monte Carlo.
///
/// * `K` - kernel
/// * `L` - likelihood
/// * `M` - mean function
pub struct StVgp<K, L, M> {
    x: DataHolder,
    y: DataHolder,
    kernel: K,
    likelihood: L,
    mean_function: M,
    posterior: VariationalPosterior,
    /// jittered Cholesky factor of `K(X, X)`, `[R, n, n]`
    chol: Tensor,
    config: StvgpConfig,
    noise: NoiseSource,
}

impl<K: Kernel, L: Likelihood, M: MeanFunction> StVgp<K, L, M> {
    /// Build the model and allocate the variational parameters.
    ///
    /// # Arguments
    /// * `varmap` - variable map that receives `{prefix}.q_mu` and `{prefix}.q_sqrt`
    /// * `prefix` - name prefix of the variational parameters
    /// * `x` - inputs, `[n, D]`
    /// * `y` - outputs, `[n, R]`
    /// * `num_latent` - number of latent functions (defaults to the columns of `y`)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        varmap: &VarMap,
        prefix: &str,
        x: Tensor,
        y: Tensor,
        kernel: K,
        likelihood: L,
        mean_function: M,
        num_latent: Option<usize>,
        config: StvgpConfig,
    ) -> Result<Self> {
        let (num_data, _) = x.dims2()?;
        let (num_rows_y, num_cols_y) = y.dims2()?;
        if num_rows_y != num_data {
            return Err(StvgpError::ShapeMismatch {
                what: "rows of Y",
                expected: num_data,
                found: num_rows_y,
            });
        }
        let num_latent = num_latent.unwrap_or(num_cols_y);
        config.validate(num_data)?;

        info!(
            "StVGP: {} data points, {} latent functions, {} covariance, {} KL, {} samples",
            num_data,
            num_latent,
            config.covariance,
            if config.kl_analytic { "analytic" } else { "stochastic" },
            config.num_samples
        );

        let posterior = VariationalPosterior::new(
            varmap,
            prefix,
            num_data,
            num_latent,
            config.covariance,
            x.dtype(),
            x.device(),
        )?;
        let chol = kernel.cholesky(&x, num_latent)?;
        let noise = NoiseSource::new(config.seed);

        Ok(Self {
            x: DataHolder::new(x),
            y: DataHolder::new(y),
            kernel,
            likelihood,
            mean_function,
            posterior,
            chol,
            config,
            noise,
        })
    }

    pub fn num_data(&self) -> usize {
        self.posterior.num_data()
    }

    pub fn num_latent(&self) -> usize {
        self.posterior.num_latent()
    }

    pub fn x(&self) -> &Tensor {
        self.x.value()
    }

    pub fn y(&self) -> &Tensor {
        self.y.value()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn posterior(&self) -> &VariationalPosterior {
        &self.posterior
    }

    /// Variational mean in whitened coordinates, `[R, n]`
    pub fn q_mu(&self) -> Result<Tensor> {
        self.posterior.q_mu()
    }

    /// Dense variational square root, `[R, n, n]`
    pub fn q_sqrt(&self) -> Result<Tensor> {
        self.posterior.dense_sqrt()
    }

    /// Variables an optimizer should update
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.posterior.vars()
    }

    /// Replace the training data.
    ///
    /// The variational parameters were sized from the original data, so a
    /// change in the number of data points is refused and the model is
    /// left untouched.
    pub fn set_data(&mut self, x: Tensor, y: Tensor) -> Result<()> {
        let n = self.num_data();
        for (what, found) in [("rows of X", x.dim(0)?), ("rows of Y", y.dim(0)?)] {
            if found != n {
                return Err(StvgpError::ShapeMismatch {
                    what,
                    expected: n,
                    found,
                });
            }
        }
        if self.x.shape_changes(&x) {
            return Err(StvgpError::ShapeMismatch {
                what: "columns of X",
                expected: self.x.dims()[1],
                found: x.dim(1)?,
            });
        }
        if self.y.shape_changes(&y) {
            return Err(StvgpError::ShapeMismatch {
                what: "columns of Y",
                expected: self.y.dims()[1],
                found: y.dim(1)?,
            });
        }
        let chol = self.kernel.cholesky(&x, self.num_latent())?;
        self.chol = chol;
        self.x.set(x);
        self.y.set(y);
        debug!("replaced training data ({} points)", n);
        Ok(())
    }

    /// Map whitened draws `u` (`[R, n, N]`) to function values at the
    /// training inputs: `f = L u + m(X)`.
    pub fn whitened_to_function(&self, u: &Tensor) -> Result<Tensor> {
        let mean = self
            .mean_function
            .forward(self.x.value())?
            .to_dtype(u.dtype())?
            .t()?
            .unsqueeze(2)?;
        Ok(self.chol.matmul(&u.contiguous()?)?.broadcast_add(&mean)?)
    }

    /// Draw `num_samples` function-value samples at the training inputs.
    ///
    /// The KL estimate of the same draws comes back with them; nothing is
    /// kept between calls.
    pub fn sample(&self, num_samples: usize) -> Result<PosteriorSample> {
        let shape = (self.num_latent(), self.num_data(), num_samples);
        let x = self.x.value();
        let v = self.noise.standard_normal(shape, x.dtype(), x.device())?;
        self.sample_from_noise(v)
    }

    /// Same as [`StVgp::sample`] with given standard normal draws `[R, n, N]`
    pub fn sample_from_noise(&self, v: Tensor) -> Result<PosteriorSample> {
        let whitened = self.posterior.sample_whitened(v)?;
        let f = self.whitened_to_function(&whitened.u)?;
        Ok(PosteriorSample {
            f,
            kl: whitened.kl,
        })
    }

    /// Stochastic evidence lower bound (scalar).
    ///
    /// ```text
    /// stochastic KL: (Σ log p(y | f) - KL) / N
    /// analytic KL:   Σ log p(y | f) / N - KL
    /// ```
    pub fn build_likelihood(&self) -> Result<Tensor> {
        let num_samples = self.config.num_samples;
        let sample = self.sample(num_samples)?;
        let lik = self
            .likelihood
            .logp(&sample.f, self.y.value())?
            .sum_all()?;

        let elbo = if self.config.kl_analytic {
            ((lik / num_samples as f64)? - self.posterior.analytic_kl()?)?
        } else {
            ((lik - sample.kl)? / num_samples as f64)?
        };
        Ok(elbo)
    }

    /// Negative ELBO, the quantity an optimizer minimises
    pub fn elbo_loss(&self) -> Result<Tensor> {
        Ok(self.build_likelihood()?.neg()?)
    }

    /// KL divergence of the posterior from the whitened prior: the closed
    /// form when configured, else the Monte Carlo average over `num_samples`
    /// fresh draws.
    pub fn kl_divergence(&self, num_samples: usize) -> Result<Tensor> {
        if self.config.kl_analytic {
            return self.posterior.analytic_kl();
        }
        let shape = (self.num_latent(), self.num_data(), num_samples);
        let x = self.x.value();
        let v = self.noise.standard_normal(shape, x.dtype(), x.device())?;
        let whitened = self.posterior.sample_whitened(v)?;
        Ok((whitened.kl / num_samples as f64)?)
    }

    /// Posterior of the latent functions at `xnew` (`[m, D]`).
    ///
    /// Returns mean `[m, R]` and variance `[m, R]`, or the full covariance
    /// `[m, m, R]` when `full_cov`.
    pub fn build_predict(&self, xnew: &Tensor, full_cov: bool) -> Result<(Tensor, Tensor)> {
        let xnew = xnew.to_dtype(self.x.value().dtype())?;
        let (mu, var) = conditional(
            &xnew,
            self.x.value(),
            &self.kernel,
            &self.q_mu()?,
            &self.q_sqrt()?,
            full_cov,
        )?;
        let mu = (mu + self.mean_function.forward(&xnew)?.to_dtype(var.dtype())?)?;
        Ok((mu, var))
    }

    pub fn predict_f(&self, xnew: &Tensor, full_cov: bool) -> Result<(Tensor, Tensor)> {
        self.build_predict(xnew, full_cov)
    }

    /// Predictive mean and variance of new observations at `xnew`
    pub fn predict_y(&self, xnew: &Tensor) -> Result<(Tensor, Tensor)> {
        let (fmu, fvar) = self.build_predict(xnew, false)?;
        self.likelihood.predict_mean_and_var(&fmu, &fvar)
    }
}
