use thiserror::Error;

/// Errors raised while building or evaluating a stochastic variational GP.
#[derive(Debug, Error)]
pub enum StvgpError {
    /// Invalid model configuration, e.g. a bandwidth outside `(1, n)` or
    /// an analytic KL requested for a banded posterior.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Training data changed size after the variational parameters were
    /// allocated; resizing them is not supported.
    #[error("shape mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Host-side linear algebra failed (e.g. kernel matrix not positive definite)
    #[error("numerical error: {0}")]
    Numerical(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, StvgpError>;

impl StvgpError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StvgpError::Configuration(msg.into())
    }
}
