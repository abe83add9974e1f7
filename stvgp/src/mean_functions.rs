use candle_core::Tensor;

use crate::error::{Result, StvgpError};

/// Prior mean `m(X)`, returning `[n, R]`.
pub trait MeanFunction {
    fn forward(&self, x: &Tensor) -> Result<Tensor>;
}

/// `m(X) = 0`
#[derive(Debug, Clone)]
pub struct Zero {
    num_latent: usize,
}

impl Zero {
    pub fn new(num_latent: usize) -> Self {
        Self { num_latent }
    }
}

impl MeanFunction for Zero {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = x.dim(0)?;
        Ok(Tensor::zeros((n, self.num_latent), x.dtype(), x.device())?)
    }
}

/// `m(X) = c` with one constant per latent output
#[derive(Debug, Clone)]
pub struct Constant {
    /// `[R]`
    c: Tensor,
}

impl Constant {
    pub fn new(c: Tensor) -> Result<Self> {
        c.dims1()?;
        Ok(Self { c })
    }
}

impl MeanFunction for Constant {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = x.dim(0)?;
        let r = self.c.dim(0)?;
        let c = self.c.to_dtype(x.dtype())?.unsqueeze(0)?;
        Ok(c.broadcast_as((n, r))?.contiguous()?)
    }
}

/// `m(X) = X A + b`
#[derive(Debug, Clone)]
pub struct Linear {
    /// `[D, R]`
    a: Tensor,
    /// `[R]`
    b: Tensor,
}

impl Linear {
    pub fn new(a: Tensor, b: Tensor) -> Result<Self> {
        let (_, r) = a.dims2()?;
        if b.dims1()? != r {
            return Err(StvgpError::ShapeMismatch {
                what: "linear mean offset",
                expected: r,
                found: b.dim(0)?,
            });
        }
        Ok(Self { a, b })
    }
}

impl MeanFunction for Linear {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let a = self.a.to_dtype(x.dtype())?;
        let b = self.b.to_dtype(x.dtype())?.unsqueeze(0)?;
        Ok(x.matmul(&a)?.broadcast_add(&b)?)
    }
}

impl<M: MeanFunction + ?Sized> MeanFunction for Box<M> {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        (**self).forward(x)
    }
}
