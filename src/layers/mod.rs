//! Layer abstractions and the concrete layers.
//!
//! # Layer Contract
//!
//! Every layer implements [`Layer`]:
//!
//! 1. Construct it with its hyperparameters (units, filters, window, ...).
//! 2. [`Layer::build`] it once with the shape of the input it will receive.
//!    This allocates every buffer the layer will ever use.
//! 3. [`Layer::forward`] copies the input into the layer's private cache
//!    and returns a borrow of the layer-owned output buffer.
//! 4. [`Layer::backward`] takes `∂loss/∂output` and returns a borrow of the
//!    layer-owned `∂loss/∂input` buffer. Trainable layers *add* their
//!    parameter gradients into accumulators that only
//!    [`Trainable::zero_grad`] clears.
//!
//! Because outputs are borrows of `&mut self`, the compiler rejects holding
//! a layer's output across the next call on that layer.
//!
//! # Capabilities
//!
//! Trainability is a separate capability: [`Layer::as_trainable`] returns
//! `Some` for layers with kernels ([`Dense`], [`Conv`]) and `None` for the
//! rest ([`MaxPool`], [`AvgPool`], [`Flatten`]).
//! [`Duplicable`] provides deep copies and the inference forks used by
//! parallel prediction.

use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::tensors::Tensor;
use rand::rngs::StdRng;
use std::fmt;

mod avgpool;
pub use self::avgpool::AvgPool;

mod conv;
pub use self::conv::Conv;

mod dense;
pub use self::dense::Dense;

mod flatten;
pub use self::flatten::Flatten;

mod maxpool;
pub use self::maxpool::MaxPool;

/// The concrete layer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// [`Dense`].
    Dense,
    /// [`Conv`].
    Conv,
    /// [`MaxPool`].
    MaxPool,
    /// [`AvgPool`].
    AvgPool,
    /// [`Flatten`].
    Flatten,
}

impl LayerKind {
    /// Persistence tag.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Conv => "conv",
            Self::MaxPool => "max_pool",
            Self::AvgPool => "avg_pool",
            Self::Flatten => "flatten",
        }
    }

    /// Inverse of [`LayerKind::tag`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag.trim() {
            "dense" => Self::Dense,
            "conv" => Self::Conv,
            "max_pool" => Self::MaxPool,
            "avg_pool" => Self::AvgPool,
            "flatten" => Self::Flatten,
            _ => return None,
        })
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A human readable layer name.
pub trait Named {
    /// The layer's name, e.g. `"Dense"`.
    fn name(&self) -> &'static str;
}

/// Copying layers.
pub trait Duplicable {
    /// A full deep copy: parameters, gradients and buffers all get fresh
    /// cells.
    fn duplicate(&self) -> Box<dyn Layer>;

    /// An inference copy: parameters and their gradients alias the
    /// original, every scratch buffer is private to the fork.
    ///
    /// Forks must only read parameters. Training a fork writes the
    /// original's kernels.
    fn fork(&self) -> Box<dyn Layer>;
}

/// The core layer contract (see the module docs).
pub trait Layer: Named + Duplicable + Send + Sync + fmt::Debug {
    /// Which concrete layer this is.
    fn kind(&self) -> LayerKind;

    /// Allocates every buffer for inputs of `input_shape`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the layer is already built or the shape is
    /// unusable for this layer.
    fn build(&mut self, input_shape: &[usize]) -> Result<()>;

    /// Whether [`Layer::build`] has succeeded.
    fn is_built(&self) -> bool;

    /// Runs the layer on `input` and returns its output buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before [`Layer::build`]
    /// - [`Error::ShapeMismatch`] if `input` does not have the built shape
    fn forward(&mut self, input: &Tensor) -> Result<&Tensor>;

    /// Propagates `grad` (`∂loss/∂output`) and returns `∂loss/∂input`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before [`Layer::build`]
    /// - [`Error::ShapeMismatch`] if `grad` does not have the output shape
    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor>;

    /// The input shape given to [`Layer::build`].
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before [`Layer::build`].
    fn input_shape(&self) -> Result<&[usize]>;

    /// The shape of [`Layer::output`].
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before [`Layer::build`].
    fn output_shape(&self) -> Result<&[usize]>;

    /// The output buffer as of the last [`Layer::forward`].
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before [`Layer::build`].
    fn output(&self) -> Result<&Tensor>;

    /// The input-gradient buffer as of the last [`Layer::backward`].
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before [`Layer::build`].
    fn grad_input(&self) -> Result<&Tensor>;

    /// Number of trainable scalars (zero before build).
    fn num_params(&self) -> usize {
        self.as_trainable()
            .and_then(|t| t.parameters().ok())
            .map_or(0, |ps| ps.iter().map(|p| p.len()).sum())
    }

    /// Switches training mode.
    fn set_training(&mut self, training: bool);

    /// Whether the layer is in training mode.
    fn is_training(&self) -> bool;

    /// Position of the layer in its model.
    fn id(&self) -> usize;

    /// Sets the position of the layer in its model.
    fn set_id(&mut self, id: usize);

    /// Window and stride of spatial layers; `None` for the rest.
    fn geometry(&self) -> Option<Geometry> {
        None
    }

    /// The trainable capability, if the layer has parameters.
    fn as_trainable(&self) -> Option<&dyn Trainable> {
        None
    }

    /// Mutable access to the trainable capability.
    fn as_trainable_mut(&mut self) -> Option<&mut dyn Trainable> {
        None
    }
}

/// The sliding window of a convolution or pooling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// `[height, width]` of the kernel or pooling window.
    pub window: [usize; 2],
    /// `[vertical, horizontal]` step between windows.
    pub stride: [usize; 2],
}

/// A parameter tensor paired with its gradient accumulator.
#[derive(Debug)]
pub struct Param<'a> {
    /// The parameter, updated in place by optimizers.
    pub value: &'a mut Tensor,
    /// `∂loss/∂value` accumulated since the last `zero_grad`.
    pub grad: &'a Tensor,
}

/// Layers with a kernel and an optional bias.
pub trait Trainable {
    /// The kernel.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn kernel(&self) -> Result<&Tensor>;

    /// The kernel gradient accumulator.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn grad_kernel(&self) -> Result<&Tensor>;

    /// The bias, `None` when the layer was configured without one.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn bias(&self) -> Result<Option<&Tensor>>;

    /// The bias gradient accumulator.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn grad_bias(&self) -> Result<Option<&Tensor>>;

    /// Whether the layer was configured with a bias.
    fn has_bias(&self) -> bool;

    /// The layer's activation.
    fn activation(&self) -> Activation;

    /// Every parameter tensor, kernel first.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn parameters(&self) -> Result<Vec<&Tensor>>;

    /// Every parameter with its gradient, kernel first.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn parameters_mut(&mut self) -> Result<Vec<Param<'_>>>;

    /// Clears every gradient accumulator.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn zero_grad(&mut self) -> Result<()>;

    /// Draws fresh parameters from the layer's initializers.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build.
    fn initialize(&mut self, rng: &mut StdRng) -> Result<()>;

    /// Overwrites the kernel with row-major `values`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before build
    /// - [`Error::ShapeMismatch`] on a wrong value count
    fn load_kernel(&mut self, values: &[f64]) -> Result<()>;

    /// Overwrites the bias with `values`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before build
    /// - [`Error::UnsupportedOperation`] if the layer has no bias
    /// - [`Error::ShapeMismatch`] on a wrong value count
    fn load_bias(&mut self, values: &[f64]) -> Result<()>;
}

/// Kernel, bias and their accumulators.
#[derive(Debug, Clone)]
pub(crate) struct Params {
    pub(crate) kernel: Tensor,
    pub(crate) grad_kernel: Tensor,
    pub(crate) bias: Option<Tensor>,
    pub(crate) grad_bias: Option<Tensor>,
}

impl Params {
    pub(crate) fn new(kernel_shape: &[usize], bias_shape: Option<&[usize]>) -> Result<Self> {
        Ok(Self {
            kernel: Tensor::zeros(kernel_shape)?,
            grad_kernel: Tensor::zeros(kernel_shape)?,
            bias: bias_shape.map(Tensor::zeros).transpose()?,
            grad_bias: bias_shape.map(Tensor::zeros).transpose()?,
        })
    }

    /// Aliases every tensor.
    pub(crate) fn fork(&self) -> Self {
        Self {
            kernel: self.kernel.alias(),
            grad_kernel: self.grad_kernel.alias(),
            bias: self.bias.as_ref().map(Tensor::alias),
            grad_bias: self.grad_bias.as_ref().map(Tensor::alias),
        }
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        let mut out = vec![&self.kernel];
        out.extend(self.bias.as_ref());
        out
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<Param<'_>> {
        let mut out = vec![Param {
            value: &mut self.kernel,
            grad: &self.grad_kernel,
        }];
        if let (Some(value), Some(grad)) = (self.bias.as_mut(), self.grad_bias.as_ref()) {
            out.push(Param { value, grad });
        }
        out
    }

    pub(crate) fn zero_grad(&mut self) {
        self.grad_kernel.zero();
        if let Some(g) = self.grad_bias.as_mut() {
            g.zero();
        }
    }

    pub(crate) fn initialize(&mut self, kernel: Initializer, bias: Initializer, rng: &mut StdRng) {
        kernel.fill(&mut self.kernel, rng);
        if let Some(b) = self.bias.as_mut() {
            bias.fill(b, rng);
        }
    }

    pub(crate) fn load_bias(&mut self, values: &[f64]) -> Result<()> {
        self.bias
            .as_mut()
            .ok_or_else(|| Error::unsupported("layer has no bias"))?
            .copy_from_slice(values)
    }
}

/// Implements [`Trainable`] for a layer exposing `params()`/`params_mut()`
/// and the `activation`, `use_bias`, `kernel_init` and `bias_init` fields.
macro_rules! impl_trainable {
    ($layer:ty) => {
        impl $crate::layers::Trainable for $layer {
            fn kernel(&self) -> $crate::error::Result<&$crate::tensors::Tensor> {
                Ok(&self.params()?.kernel)
            }

            fn grad_kernel(&self) -> $crate::error::Result<&$crate::tensors::Tensor> {
                Ok(&self.params()?.grad_kernel)
            }

            fn bias(&self) -> $crate::error::Result<Option<&$crate::tensors::Tensor>> {
                Ok(self.params()?.bias.as_ref())
            }

            fn grad_bias(&self) -> $crate::error::Result<Option<&$crate::tensors::Tensor>> {
                Ok(self.params()?.grad_bias.as_ref())
            }

            fn has_bias(&self) -> bool {
                self.use_bias
            }

            fn activation(&self) -> $crate::activation::Activation {
                self.activation
            }

            fn parameters(&self) -> $crate::error::Result<Vec<&$crate::tensors::Tensor>> {
                Ok(self.params()?.parameters())
            }

            fn parameters_mut(
                &mut self,
            ) -> $crate::error::Result<Vec<$crate::layers::Param<'_>>> {
                Ok(self.params_mut()?.parameters_mut())
            }

            fn zero_grad(&mut self) -> $crate::error::Result<()> {
                self.params_mut()?.zero_grad();
                Ok(())
            }

            fn initialize(&mut self, rng: &mut rand::rngs::StdRng) -> $crate::error::Result<()> {
                let (k, b) = (self.kernel_init, self.bias_init);
                self.params_mut()?.initialize(k, b, rng);
                Ok(())
            }

            fn load_kernel(&mut self, values: &[f64]) -> $crate::error::Result<()> {
                self.params_mut()?.kernel.copy_from_slice(values)
            }

            fn load_bias(&mut self, values: &[f64]) -> $crate::error::Result<()> {
                self.params_mut()?.load_bias(values)
            }
        }
    };
}
pub(crate) use impl_trainable;

/// Fails with [`Error::ShapeMismatch`] unless `t` has shape `expected`.
pub(crate) fn expect_shape(t: &Tensor, expected: &[usize]) -> Result<()> {
    if t.shape() == expected {
        Ok(())
    } else {
        Err(Error::shape(expected, t.shape()))
    }
}

/// Rejects zero-sized hyperparameters.
pub(crate) fn positive(what: &str, values: &[usize]) -> Result<()> {
    if values.is_empty() || values.contains(&0) {
        return Err(Error::config(format!("{what} must be positive, got {values:?}")));
    }
    Ok(())
}

/// `(channels, height, width)` of a convolution or pooling input, checking
/// that a `window` fits inside it.
pub(crate) fn image_dims(layer: &str, input_shape: &[usize], window: [usize; 2]) -> Result<[usize; 3]> {
    let &[c, h, w] = input_shape else {
        return Err(Error::config(format!(
            "{layer} expects a (channels, height, width) input, got {input_shape:?}"
        )));
    };
    positive("input dimensions", input_shape)?;
    if window[0] > h || window[1] > w {
        return Err(Error::config(format!(
            "{layer} window {window:?} is larger than the input ({h}, {w})"
        )));
    }
    Ok([c, h, w])
}

/// Output extent along one axis of a valid, strided window.
#[inline]
pub(crate) const fn out_extent(input: usize, window: usize, stride: usize) -> usize {
    (input - window) / stride + 1
}
