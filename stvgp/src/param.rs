use candle_core::{Tensor, Var};
use candle_nn::VarMap;

use crate::error::{Result, StvgpError};

/// Constraint applied between the free (optimised) value and the value a
/// model sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// value = exp(free)
    Positive,
}

impl Transform {
    fn forward(&self, free: &Tensor) -> Result<Tensor> {
        match self {
            Transform::Identity => Ok(free.clone()),
            Transform::Positive => Ok(free.exp()?),
        }
    }

    fn backward(&self, value: &Tensor) -> Result<Tensor> {
        match self {
            Transform::Identity => Ok(value.clone()),
            Transform::Positive => Ok(value.log()?),
        }
    }
}

/// Trainable array-valued parameter.
///
/// The free value lives in a candle [`Var`] registered in a [`VarMap`], so
/// any candle optimizer built from `varmap.all_vars()` updates it.
pub struct Param {
    var: Var,
    transform: Transform,
}

impl Param {
    /// Register a new parameter initialised at the (constrained) `value`.
    ///
    /// * `varmap` - variable map holding every trainable variable
    /// * `name` - full name of the variable in the map
    /// * `value` - initial value, already satisfying the constraint
    /// * `transform` - constraint
    pub fn new(varmap: &VarMap, name: &str, value: &Tensor, transform: Transform) -> Result<Self> {
        let free = transform.backward(value)?.contiguous()?;
        let var = Var::from_tensor(&free)?;

        let mut data = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("variable map poisoned: {}", e)))?;
        if data.contains_key(name) {
            return Err(StvgpError::config(format!(
                "parameter '{}' is already registered",
                name
            )));
        }
        data.insert(name.to_string(), var.clone());

        Ok(Self { var, transform })
    }

    /// Constrained value, tracked for gradients
    pub fn value(&self) -> Result<Tensor> {
        self.transform.forward(self.var.as_tensor())
    }

    /// Free (unconstrained) value
    pub fn free(&self) -> &Tensor {
        self.var.as_tensor()
    }

    pub fn var(&self) -> &Var {
        &self.var
    }

    /// Overwrite with a new constrained value of the same shape
    pub fn set(&self, value: &Tensor) -> Result<()> {
        let free = self.transform.backward(value)?.to_dtype(self.var.dtype())?;
        self.var.set(&free)?;
        Ok(())
    }
}

/// Observed array (inputs or outputs) held by a model.
///
/// Values can be replaced wholesale; [`DataHolder::set`] reports whether the
/// shape changed so the owner can refuse or re-derive dependent state.
pub struct DataHolder {
    value: Tensor,
}

impl DataHolder {
    pub fn new(value: Tensor) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn dims(&self) -> &[usize] {
        self.value.dims()
    }

    /// Would `value` change the held shape?
    pub fn shape_changes(&self, value: &Tensor) -> bool {
        self.value.dims() != value.dims()
    }

    /// Replace the held array, returning `true` if the shape changed
    pub fn set(&mut self, value: Tensor) -> bool {
        let changed = self.shape_changes(&value);
        self.value = value;
        changed
    }
}
