//! Input representations accepted at the model boundary.

use crate::error::{Error, Result};
use crate::tensors::{Tensor, checked_len};

/// One input or target, either already shaped or as flat row-major values.
///
/// A sample is resolved against the shape the model expects exactly once,
/// before it reaches any layer. Layers only ever see [`Tensor`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// A tensor that must already have the expected shape.
    Tensor(Tensor),
    /// Flat values laid out row-major in the expected shape.
    Array(Vec<f64>),
}

impl Sample {
    /// Turns the sample into a tensor of `shape`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if a tensor has a different shape or an
    /// array holds the wrong number of values.
    pub fn resolve(self, shape: &[usize]) -> Result<Tensor> {
        match self {
            Self::Tensor(t) if t.shape() == shape => Ok(t),
            Self::Tensor(t) => Err(Error::shape(shape, t.shape())),
            Self::Array(values) => {
                let len = checked_len(shape)?;
                if values.len() != len {
                    return Err(Error::shape(&[len], &[values.len()]));
                }
                Tensor::from_vec(values, shape)
            }
        }
    }
}

impl From<Tensor> for Sample {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<Vec<f64>> for Sample {
    fn from(values: Vec<f64>) -> Self {
        Self::Array(values)
    }
}
