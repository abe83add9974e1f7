//! Stochastic variational Gaussian process (StVGP).
//!
//! A Gaussian variational posterior over the latent function values at the
//! training inputs, parameterised in whitened coordinates `f = L u + m(X)`
//! with `L` the Cholesky factor of the kernel matrix. The ELBO is estimated
//! by Monte Carlo: the expected log-likelihood always, the KL divergence
//! either from the same draws or in closed form.
//!
//! # Example
//!
//! ```ignore
//! use stvgp::{StVgp, StvgpConfig, CovarianceStructure, TrainConfig, fit};
//! use stvgp::kernels::Rbf;
//! use stvgp::likelihood::GaussianLikelihood;
//! use stvgp::mean_functions::Zero;
//!
//! let varmap = candle_nn::VarMap::new();
//! let config = StvgpConfig::new(20).with_covariance(CovarianceStructure::Banded(3));
//! let model = StVgp::new(
//!     &varmap, "gp", x, y,
//!     Rbf::new(1.0, vec![1.0])?,
//!     GaussianLikelihood::new(0.1)?,
//!     Zero::new(1),
//!     None,
//!     config,
//! )?;
//!
//! let trace = fit(&model, &TrainConfig::default())?;
//! let (mean, var) = model.predict_f(&xnew, false)?;
//! ```

pub mod cli;
pub mod conditionals;
pub mod config;
pub mod error;
pub mod io;
pub mod kernels;
pub mod kullback_leiblers;
pub mod likelihood;
pub mod linalg;
pub mod mean_functions;
pub mod model;
pub mod noise;
pub mod param;
pub mod posterior;
pub mod q_sqrt;
pub mod train;

pub use config::{CovarianceStructure, StvgpConfig, TrainConfig};
pub use error::{Result, StvgpError};
pub use model::{PosteriorSample, StVgp};
pub use posterior::{VariationalPosterior, WhitenedSample};
pub use q_sqrt::QSqrt;
pub use train::fit;

pub use candle_core;
pub use candle_nn;
