use candle_core::Tensor;

use crate::error::{Result, StvgpError};
use crate::linalg::{self, JITTER};

/// Covariance function over inputs of shape `[n, D]`.
pub trait Kernel {
    /// Cross covariance `K(X, X2)`, shape `[n, m]`
    fn k(&self, x: &Tensor, x2: &Tensor) -> Result<Tensor>;

    /// Diagonal of `K(X, X)`, shape `[n]`
    fn k_diag(&self, x: &Tensor) -> Result<Tensor>;

    /// Lower Cholesky factor of `K(X, X) + jitter I`, replicated for each
    /// latent output: `[R, n, n]`
    fn cholesky(&self, x: &Tensor, num_latent: usize) -> Result<Tensor> {
        let n = x.dim(0)?;
        let kxx = linalg::to_dmatrix(&self.k(x, x)?)?;
        let ll = linalg::cholesky_jittered(&kxx, JITTER)?;
        let ll = linalg::from_dmatrix(&ll, x.dtype(), x.device())?;
        Ok(ll
            .unsqueeze(0)?
            .broadcast_as((num_latent, n, n))?
            .contiguous()?)
    }
}

/// Variance and lengthscales shared by stationary kernels
#[derive(Debug, Clone)]
pub struct Stationary {
    variance: f64,
    /// one shared lengthscale, or one per input dimension
    lengthscales: Vec<f64>,
}

impl Stationary {
    pub fn new(variance: f64, lengthscales: Vec<f64>) -> Result<Self> {
        if !(variance > 0.0) {
            return Err(StvgpError::config(format!(
                "kernel variance must be positive, got {}",
                variance
            )));
        }
        if lengthscales.is_empty() || lengthscales.iter().any(|&l| !(l > 0.0)) {
            return Err(StvgpError::config(format!(
                "kernel lengthscales must be positive, got {:?}",
                lengthscales
            )));
        }
        Ok(Self {
            variance,
            lengthscales,
        })
    }

    fn scale(&self, x: &Tensor) -> Result<Tensor> {
        let d = x.dim(1)?;
        match self.lengthscales.as_slice() {
            [l] => Ok((x / *l)?),
            ls if ls.len() == d => {
                let ls = Tensor::from_slice(ls, (1, d), x.device())?.to_dtype(x.dtype())?;
                Ok(x.broadcast_div(&ls)?)
            }
            ls => Err(StvgpError::config(format!(
                "{} lengthscales given for {}-dimensional inputs",
                ls.len(),
                d
            ))),
        }
    }

    /// Squared distance between scaled inputs, `[n, m]`, clamped at zero
    pub fn square_dist(&self, x: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let xs = self.scale(x)?;
        let x2s = self.scale(x2)?;
        let xx = xs.sqr()?.sum_keepdim(1)?; // n x 1
        let yy = x2s.sqr()?.sum_keepdim(1)?.t()?; // 1 x m
        let xy = xs.matmul(&x2s.t()?.contiguous()?)?; // n x m
        let dist = xx.broadcast_add(&yy)?.sub(&(xy * 2.0)?)?;
        Ok(dist.clamp(0.0, f64::INFINITY)?)
    }

    fn diag(&self, x: &Tensor) -> Result<Tensor> {
        let n = x.dim(0)?;
        Ok((Tensor::ones(n, x.dtype(), x.device())? * self.variance)?)
    }
}

/// Squared exponential kernel `σ² exp(-½ r²)`
#[derive(Debug, Clone)]
pub struct Rbf {
    base: Stationary,
}

impl Rbf {
    pub fn new(variance: f64, lengthscales: Vec<f64>) -> Result<Self> {
        Ok(Self {
            base: Stationary::new(variance, lengthscales)?,
        })
    }
}

impl Kernel for Rbf {
    fn k(&self, x: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let r2 = self.base.square_dist(x, x2)?;
        Ok(((r2 * -0.5)?.exp()? * self.base.variance)?)
    }

    fn k_diag(&self, x: &Tensor) -> Result<Tensor> {
        self.base.diag(x)
    }
}

/// Matérn 3/2 kernel `σ² (1 + √3 r) exp(-√3 r)`
#[derive(Debug, Clone)]
pub struct Matern32 {
    base: Stationary,
}

impl Matern32 {
    pub fn new(variance: f64, lengthscales: Vec<f64>) -> Result<Self> {
        Ok(Self {
            base: Stationary::new(variance, lengthscales)?,
        })
    }
}

impl Kernel for Matern32 {
    fn k(&self, x: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let sqrt3_r = (self.base.square_dist(x, x2)?.sqrt()? * 3f64.sqrt())?;
        let poly = (&sqrt3_r + 1.0)?;
        let decay = sqrt3_r.neg()?.exp()?;
        Ok(((poly * decay)? * self.base.variance)?)
    }

    fn k_diag(&self, x: &Tensor) -> Result<Tensor> {
        self.base.diag(x)
    }
}

impl<K: Kernel + ?Sized> Kernel for Box<K> {
    fn k(&self, x: &Tensor, x2: &Tensor) -> Result<Tensor> {
        (**self).k(x, x2)
    }

    fn k_diag(&self, x: &Tensor) -> Result<Tensor> {
        (**self).k_diag(x)
    }

    fn cholesky(&self, x: &Tensor, num_latent: usize) -> Result<Tensor> {
        (**self).cholesky(x, num_latent)
    }
}
