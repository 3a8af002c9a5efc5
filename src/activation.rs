//! Activation functions.
//!
//! An [`Activation`] only knows its pointwise forward function and its
//! derivative. Layers cache both the pre-activation `z` and the output `y`
//! during `forward`, then multiply the upstream gradient by
//! `derivative(z, y)` in `backward`; an activation never sees gradients.

use crate::error::{Error, Result};
use crate::tensors::Tensor;
use std::fmt;

/// An enumeration of activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Activation {
    /// Identity.
    #[default]
    Linear,
    /// `max(0, x)`.
    ReLU,
    /// `x` for positive inputs, `alpha * x` otherwise.
    LeakyReLU(f64),
    /// `x` for positive inputs, `alpha * (e^x - 1)` otherwise.
    ELU(f64),
    /// Logistic sigmoid.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// Swish/SiLU: `x * sigmoid(x)`.
    Swish,
    /// `ln(1 + e^x)`.
    Softplus,
    /// Arctangent.
    Atan,
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Activation {
    /// Evaluates the activation at `x`.
    #[must_use]
    pub fn forward(self, x: f64) -> f64 {
        match self {
            Self::Linear => x,
            Self::ReLU => x.max(0.0),
            Self::LeakyReLU(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Self::ELU(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x.exp_m1()
                }
            }
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Swish => x * sigmoid(x),
            // stable for large |x|
            Self::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
            Self::Atan => x.atan(),
        }
    }

    /// `dy/dx` given the pre-activation `x` and the cached output `y`.
    #[must_use]
    pub fn derivative(self, x: f64, y: f64) -> f64 {
        match self {
            Self::Linear => 1.0,
            Self::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyReLU(alpha) => {
                if x > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Self::ELU(alpha) => {
                if x > 0.0 {
                    1.0
                } else {
                    y + alpha
                }
            }
            Self::Sigmoid => y * (1.0 - y),
            Self::Tanh => 1.0 - y * y,
            Self::Swish => {
                let s = sigmoid(x);
                s + x * s * (1.0 - s)
            }
            Self::Softplus => sigmoid(x),
            Self::Atan => 1.0 / (1.0 + x * x),
        }
    }

    /// Writes `forward(z)` into `out`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `z` and `out` differ in shape.
    pub fn activate(self, z: &Tensor, out: &mut Tensor) -> Result<()> {
        out.apply_with(z, |_, x| self.forward(x))
    }

    /// Writes `grad * derivative(z, y)` into `out`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the four tensors do not share a shape.
    pub fn chain(self, grad: &Tensor, z: &Tensor, y: &Tensor, out: &mut Tensor) -> Result<()> {
        for t in [grad, z, y] {
            if !out.same_shape(t) {
                return Err(Error::shape(out.shape(), t.shape()));
            }
        }
        for p in 0..out.len() {
            let d = self.derivative(z.get_flat(p), y.get_flat(p));
            out.set_flat(p, grad.get_flat(p) * d);
        }
        Ok(())
    }

    /// Persistence tag, e.g. `"relu"` or `"leaky_relu:0.01"`.
    #[must_use]
    pub fn tag(self) -> String {
        match self {
            Self::Linear => "linear".into(),
            Self::ReLU => "relu".into(),
            Self::LeakyReLU(alpha) => format!("leaky_relu:{alpha}"),
            Self::ELU(alpha) => format!("elu:{alpha}"),
            Self::Sigmoid => "sigmoid".into(),
            Self::Tanh => "tanh".into(),
            Self::Swish => "swish".into(),
            Self::Softplus => "softplus".into(),
            Self::Atan => "atan".into(),
        }
    }

    /// Inverse of [`Activation::tag`].
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on an unknown tag or a bad parameter.
    pub fn from_tag(tag: &str) -> Result<Self> {
        let (name, param) = match tag.trim().split_once(':') {
            Some((n, p)) => (n, Some(p)),
            None => (tag.trim(), None),
        };
        let alpha = || -> Result<f64> {
            param
                .ok_or_else(|| Error::config(format!("activation `{name}` needs a parameter")))?
                .parse()
                .map_err(|_| Error::config(format!("bad parameter in activation tag `{tag}`")))
        };
        Ok(match name {
            "linear" => Self::Linear,
            "relu" => Self::ReLU,
            "leaky_relu" => Self::LeakyReLU(alpha()?),
            "elu" => Self::ELU(alpha()?),
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            "swish" => Self::Swish,
            "softplus" => Self::Softplus,
            "atan" => Self::Atan,
            _ => return Err(Error::config(format!("unknown activation `{tag}`"))),
        })
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}
