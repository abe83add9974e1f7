use std::cell::RefCell;

use candle_core::{DType, Device, Shape, Tensor};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::Result;

/// Source of the standard normal draws `v` used by the reparameterisation.
///
/// Without a seed the device generator (`Tensor::randn`) is used; with a
/// seed draws come from a host `SmallRng`, so repeated runs see the same
/// sequence. Every call draws fresh values.
pub enum NoiseSource {
    Device,
    Seeded(RefCell<SmallRng>),
}

impl NoiseSource {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => NoiseSource::Seeded(RefCell::new(SmallRng::seed_from_u64(seed))),
            None => NoiseSource::Device,
        }
    }

    pub fn standard_normal<S: Into<Shape>>(
        &self,
        shape: S,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        let shape: Shape = shape.into();
        match self {
            NoiseSource::Device => match dtype {
                DType::F64 => Ok(Tensor::randn(0f64, 1f64, shape, device)?),
                _ => Ok(Tensor::randn(0f32, 1f32, shape, device)?.to_dtype(dtype)?),
            },
            NoiseSource::Seeded(rng) => {
                let mut rng = rng.borrow_mut();
                let data: Vec<f64> = (0..shape.elem_count())
                    .map(|_| rng.sample::<f64, _>(StandardNormal))
                    .collect();
                Ok(Tensor::from_vec(data, shape, device)?.to_dtype(dtype)?)
            }
        }
    }
}
