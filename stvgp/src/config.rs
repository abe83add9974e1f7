use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StvgpError};

/// Shape of the variational square-root factor `S` in `q(u) = N(μ, S Sᵀ)`.
///
/// * `Diagonal` - independent (positive) scale per latent value, `[R, n]`
/// * `FullRank` - dense lower-triangular factor, `[R, n, n]`
/// * `Banded(k)` - lower-triangular band with `k` diagonals, stored `[R, n, k]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CovarianceStructure {
    Diagonal,
    #[default]
    FullRank,
    Banded(usize),
}

impl CovarianceStructure {
    /// Check the structure against the number of data points.
    /// A band needs `1 < k < n`.
    pub fn validate(&self, num_data: usize) -> Result<()> {
        if let CovarianceStructure::Banded(k) = *self {
            if k <= 1 || k >= num_data {
                return Err(StvgpError::config(format!(
                    "bandwidth must satisfy 1 < k < n, got k = {} with n = {}",
                    k, num_data
                )));
            }
        }
        Ok(())
    }

    pub fn supports_analytic_kl(&self) -> bool {
        !matches!(self, CovarianceStructure::Banded(_))
    }
}

impl FromStr for CovarianceStructure {
    type Err = StvgpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "diagonal" | "diag" => Ok(CovarianceStructure::Diagonal),
            "fullrank" | "full" => Ok(CovarianceStructure::FullRank),
            other => other
                .parse::<usize>()
                .map(CovarianceStructure::Banded)
                .map_err(|_| {
                    StvgpError::config(format!(
                        "unknown covariance structure '{}': use diagonal, fullrank or a bandwidth",
                        s
                    ))
                }),
        }
    }
}

impl fmt::Display for CovarianceStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceStructure::Diagonal => write!(f, "diagonal"),
            CovarianceStructure::FullRank => write!(f, "fullrank"),
            CovarianceStructure::Banded(k) => write!(f, "banded({})", k),
        }
    }
}

/// Configuration for the stochastic variational GP.
#[derive(Debug, Clone)]
pub struct StvgpConfig {
    /// Number of Monte Carlo samples N per ELBO evaluation
    pub num_samples: usize,
    /// Structure of the variational square root
    pub covariance: CovarianceStructure,
    /// Use the closed-form KL instead of the stochastic estimate
    pub kl_analytic: bool,
    /// Seed for the standard normal draws; `None` draws from the device RNG
    pub seed: Option<u64>,
}

impl Default for StvgpConfig {
    fn default() -> Self {
        Self {
            num_samples: 20,
            covariance: CovarianceStructure::FullRank,
            kl_analytic: false,
            seed: None,
        }
    }
}

impl StvgpConfig {
    pub fn new(num_samples: usize) -> Self {
        Self {
            num_samples,
            ..Default::default()
        }
    }

    pub fn with_covariance(mut self, covariance: CovarianceStructure) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_kl_analytic(mut self, kl_analytic: bool) -> Self {
        self.kl_analytic = kl_analytic;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject settings that cannot work for `num_data` points.
    pub fn validate(&self, num_data: usize) -> Result<()> {
        if self.num_samples == 0 {
            return Err(StvgpError::config("num_samples must be positive"));
        }
        self.covariance.validate(num_data)?;
        if self.kl_analytic && !self.covariance.supports_analytic_kl() {
            return Err(StvgpError::config(format!(
                "analytic KL is not available for {} covariance",
                self.covariance
            )));
        }
        Ok(())
    }
}

/// Optimisation settings for [`crate::train::fit`].
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub num_iters: usize,
    pub log_every: usize,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            num_iters: 500,
            log_every: 50,
            show_progress: true,
            verbose: false,
        }
    }
}
