//! Sequential models.
//!
//! A [`Sequential`] chains layers so that each one consumes the output of
//! its predecessor. It owns the optimizer and the loss, runs the training
//! loop ([`Sequential::train`]) and provides parallel read-only inference
//! ([`Sequential::forward_all`]).
//!
//! # Example
//!
//! ```rust
//! use cellnet::activation::Activation;
//! use cellnet::layers::Dense;
//! use cellnet::loss::Loss;
//! use cellnet::model::{Sequential, TrainConfig};
//! use cellnet::optim::GradientDescent;
//! use cellnet::tensor;
//!
//! let mut model = Sequential::new();
//! model.configure(TrainConfig::default().with_seed(3)).unwrap();
//! model.add(Dense::new(3, Activation::Tanh).unwrap());
//! model.add(Dense::new(1, Activation::Sigmoid).unwrap());
//! model
//!     .compile(&[2], Box::new(GradientDescent::new(0.5).unwrap()), Loss::MeanSquaredError)
//!     .unwrap();
//!
//! let y = model.forward(&tensor!([0.0, 1.0])).unwrap();
//! assert_eq!(y.shape(), &[1]);
//! ```

mod config;
pub use self::config::TrainConfig;

mod metrics;

mod parallel;

mod sample;
pub use self::sample::Sample;

mod train;

use crate::error::{Error, Result};
use crate::layers::{Layer, Trainable};
use crate::loss::Loss;
use crate::optim::Optimizer;
use crate::tensors::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// A linear stack of layers.
#[derive(Debug)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    optimizer: Option<Box<dyn Optimizer>>,
    loss: Loss,
    config: TrainConfig,
    history: Vec<f64>,
    loss_grad: Option<Tensor>,
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequential {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            optimizer: None,
            loss: Loss::MeanSquaredError,
            config: TrainConfig::default(),
            history: Vec::new(),
            loss_grad: None,
        }
    }

    /// Appends a layer.
    pub fn add(&mut self, layer: impl Layer + 'static) {
        self.push(Box::new(layer));
    }

    /// Appends an already boxed layer.
    pub fn push(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    /// Replaces the configuration used by `compile`, `train` and
    /// `forward_all`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `config` does not validate.
    pub fn configure(&mut self, config: TrainConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// The current configuration.
    #[must_use]
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Builds every layer, initializes their parameters and prepares the
    /// optimizer.
    ///
    /// Layers are built in order, each with the output shape of its
    /// predecessor, and receive their position as id. Layers that are
    /// already built (e.g. read back by [`crate::modelio`]) must expect the
    /// shape they are fed and keep their parameters.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if the model is empty, already compiled,
    ///   or a layer rejects its input shape
    /// - [`Error::ShapeMismatch`] if a pre-built layer expects another shape
    pub fn compile(
        &mut self,
        input_shape: &[usize],
        mut optimizer: Box<dyn Optimizer>,
        loss: Loss,
    ) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::config("cannot compile a model without layers"));
        }
        if self.optimizer.is_some() {
            return Err(Error::config("model is already compiled"));
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut shape = input_shape.to_vec();
        for (id, layer) in self.layers.iter_mut().enumerate() {
            layer.set_id(id);
            if layer.is_built() {
                if layer.input_shape()? != shape.as_slice() {
                    return Err(Error::shape(layer.input_shape()?, &shape));
                }
            } else {
                layer.build(&shape)?;
                if let Some(t) = layer.as_trainable_mut() {
                    t.initialize(&mut rng)?;
                }
            }
            shape = layer.output_shape()?.to_vec();
        }

        let trainables: Vec<&dyn Trainable> =
            self.layers.iter().filter_map(|l| l.as_trainable()).collect();
        optimizer.initialize(&trainables)?;

        log::debug!(
            "compiled {} layers ({:?} -> {:?}, {} parameters) with {} and {:?}",
            self.layers.len(),
            input_shape,
            shape,
            self.num_params(),
            optimizer.name(),
            loss
        );
        self.loss_grad = Some(Tensor::zeros(&shape)?);
        self.optimizer = Some(optimizer);
        self.loss = loss;
        Ok(())
    }

    /// Whether [`Sequential::compile`] has succeeded.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.optimizer.is_some()
    }

    /// Whether every layer is built, so the model can run forward passes.
    #[must_use]
    pub fn is_built(&self) -> bool {
        !self.layers.is_empty() && self.layers.iter().all(|l| l.is_built())
    }

    fn ensure_built(&self) -> Result<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(Error::not_built("model"))
        }
    }

    /// The loss the model was compiled with.
    #[must_use]
    pub fn loss(&self) -> Loss {
        self.loss
    }

    /// The optimizer the model was compiled with.
    #[must_use]
    pub fn optimizer(&self) -> Option<&dyn Optimizer> {
        self.optimizer.as_deref()
    }

    /// Shape of the tensors the first layer accepts.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before the first layer is built.
    pub fn input_shape(&self) -> Result<&[usize]> {
        self.layers
            .first()
            .ok_or_else(|| Error::not_built("model"))?
            .input_shape()
    }

    /// Shape of the tensors the last layer produces.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before the last layer is built.
    pub fn output_shape(&self) -> Result<&[usize]> {
        self.layers
            .last()
            .ok_or_else(|| Error::not_built("model"))?
            .output_shape()
    }

    /// Runs one input through every layer.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before compilation
    /// - [`Error::ShapeMismatch`] if `input` has the wrong shape
    pub fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        self.ensure_built()?;
        forward_layers(&mut self.layers, input)
    }

    /// Resolves `sample` against the input shape, then runs it forward.
    ///
    /// # Errors
    ///
    /// As [`Sequential::forward`] and [`Sample::resolve`].
    pub fn forward_sample(&mut self, sample: Sample) -> Result<&Tensor> {
        self.ensure_built()?;
        let input = sample.resolve(self.input_shape()?)?;
        forward_layers(&mut self.layers, &input)
    }

    /// Propagates `∂loss/∂output` back through every layer, accumulating
    /// parameter gradients, and returns `∂loss/∂input`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before compilation
    /// - [`Error::ShapeMismatch`] if `grad` has the wrong shape
    pub fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        self.ensure_built()?;
        backward_layers(&mut self.layers, grad)
    }

    /// Clears the gradient accumulators of every trainable layer.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] if a trainable layer is not built.
    pub fn zero_grad(&mut self) -> Result<()> {
        zero_grad_layers(&mut self.layers)
    }

    /// Output of the last forward pass as flat row-major values.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before compilation.
    pub fn output_array(&self) -> Result<Vec<f64>> {
        self.ensure_built()?;
        Ok(self.last()?.output()?.to_vec())
    }

    /// Copies the output of the last forward pass into `out`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] before compilation
    /// - [`Error::ShapeMismatch`] if `out` has the wrong length
    pub fn copy_output_into(&self, out: &mut [f64]) -> Result<()> {
        self.ensure_built()?;
        let output = self.last()?.output()?;
        if out.len() != output.len() {
            return Err(Error::shape(&[output.len()], &[out.len()]));
        }
        for (o, v) in out.iter_mut().zip(output.iter()) {
            *o = v;
        }
        Ok(())
    }

    fn last(&self) -> Result<&dyn Layer> {
        self.layers
            .last()
            .map(|l| &**l)
            .ok_or_else(|| Error::not_built("model"))
    }

    /// The layers in order.
    #[must_use]
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the model has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The layer at position `id`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if there is no such layer.
    pub fn layer(&self, id: usize) -> Result<&dyn Layer> {
        self.layers
            .get(id)
            .map(|l| &**l)
            .ok_or_else(|| Error::IndexOutOfRange {
                index: vec![id],
                shape: vec![self.layers.len()],
            })
    }

    fn trainable(&self, id: usize) -> Result<&dyn Trainable> {
        let layer = self.layer(id)?;
        layer.as_trainable().ok_or_else(|| {
            Error::unsupported(format!("{} layer {id} has no parameters", layer.name()))
        })
    }

    /// Kernel of the trainable layer at `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::IndexOutOfRange`] if there is no such layer
    /// - [`Error::UnsupportedOperation`] if the layer is not trainable
    pub fn kernel_of(&self, id: usize) -> Result<&Tensor> {
        self.trainable(id)?.kernel()
    }

    /// Bias of the trainable layer at `id`, `None` if it has none.
    ///
    /// # Errors
    ///
    /// As [`Sequential::kernel_of`].
    pub fn bias_of(&self, id: usize) -> Result<Option<&Tensor>> {
        self.trainable(id)?.bias()
    }

    /// Every parameter tensor in layer order: `[k1, b1, k2, b2, ...]`,
    /// skipping layers without parameters and layers without bias.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] if a trainable layer is not built.
    pub fn parameters(&self) -> Result<Vec<&Tensor>> {
        let mut out = Vec::new();
        for t in self.layers.iter().filter_map(|l| l.as_trainable()) {
            out.extend(t.parameters()?);
        }
        Ok(out)
    }

    /// The gradient of every tensor of [`Sequential::parameters`], in the
    /// same order.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] if a trainable layer is not built.
    pub fn gradients(&self) -> Result<Vec<&Tensor>> {
        let mut out = Vec::new();
        for t in self.layers.iter().filter_map(|l| l.as_trainable()) {
            out.push(t.grad_kernel()?);
            out.extend(t.grad_bias()?);
        }
        Ok(out)
    }

    /// A deep copy of the model: layers, optimizer state, configuration
    /// and history. Training the copy leaves `self` untouched.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            layers: self.layers.iter().map(|l| l.duplicate()).collect(),
            optimizer: self.optimizer.as_ref().map(|o| o.duplicate()),
            loss: self.loss,
            config: self.config.clone(),
            history: self.history.clone(),
            loss_grad: self.loss_grad.clone(),
        }
    }

    /// Total number of trainable scalars.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.num_params()).sum()
    }

    /// Loss values recorded by the last `train` call with history enabled.
    #[must_use]
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Enables or disables per-epoch loss history.
    pub fn set_history(&mut self, history: bool) {
        self.config.history = history;
    }
}

/// Chains `input` through `layers` and borrows the last output.
pub(crate) fn forward_layers<'a>(
    layers: &'a mut [Box<dyn Layer>],
    input: &Tensor,
) -> Result<&'a Tensor> {
    let Some((first, rest)) = layers.split_first_mut() else {
        return Err(Error::not_built("model"));
    };
    let mut out = first.forward(input)?;
    for layer in rest {
        out = layer.forward(out)?;
    }
    Ok(out)
}

/// Chains `grad` backwards through `layers` and borrows `∂loss/∂input`.
pub(crate) fn backward_layers<'a>(
    layers: &'a mut [Box<dyn Layer>],
    grad: &Tensor,
) -> Result<&'a Tensor> {
    let Some((last, rest)) = layers.split_last_mut() else {
        return Err(Error::not_built("model"));
    };
    let mut g = last.backward(grad)?;
    for layer in rest.iter_mut().rev() {
        g = layer.backward(g)?;
    }
    Ok(g)
}

pub(crate) fn trainables_mut(layers: &mut [Box<dyn Layer>]) -> Vec<&mut dyn Trainable> {
    layers
        .iter_mut()
        .filter_map(|l| l.as_trainable_mut())
        .collect()
}

fn zero_grad_layers(layers: &mut [Box<dyn Layer>]) -> Result<()> {
    for t in trainables_mut(layers) {
        t.zero_grad()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::layers::{Conv, Dense, Flatten, MaxPool};
    use crate::optim::GradientDescent;
    use crate::tensor;

    fn gd() -> Box<dyn Optimizer> {
        Box::new(GradientDescent::new(0.1).unwrap())
    }

    #[test]
    fn compile_chains_shapes_and_assigns_ids() {
        let mut m = Sequential::new();
        m.add(Conv::new(2, [2, 2], Activation::ReLU).unwrap());
        m.add(MaxPool::new([2, 2]).unwrap());
        m.add(Flatten::new());
        m.add(Dense::new(3, Activation::Linear).unwrap());
        m.compile(&[1, 5, 5], gd(), Loss::MeanSquaredError).unwrap();

        assert_eq!(m.layer(1).unwrap().output_shape().unwrap(), &[2, 2, 2]);
        assert_eq!(m.output_shape().unwrap(), &[1, 3]);
        let ids: Vec<usize> = m.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(m.num_params(), 2 * 4 + 2 + 8 * 3 + 3);
    }

    #[test]
    fn compute_before_compile_is_not_built() {
        let mut m = Sequential::new();
        m.add(Dense::new(1, Activation::Linear).unwrap());
        assert!(matches!(m.forward(&tensor!([1.0])), Err(Error::NotBuilt { .. })));
        assert!(matches!(m.output_array(), Err(Error::NotBuilt { .. })));
        assert!(matches!(
            Sequential::new().compile(&[1], gd(), Loss::MeanSquaredError),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn same_seed_same_weights() {
        let build = || {
            let mut m = Sequential::new();
            m.configure(TrainConfig::default().with_seed(11)).unwrap();
            m.add(Dense::new(4, Activation::Tanh).unwrap());
            m.compile(&[3], gd(), Loss::MeanSquaredError).unwrap();
            m.kernel_of(0).unwrap().to_vec()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn parameter_access_needs_a_trainable_layer() {
        let mut m = Sequential::new();
        m.add(Flatten::new());
        m.add(Dense::new(2, Activation::Linear).unwrap().with_bias(false));
        m.compile(&[2, 2], gd(), Loss::MeanSquaredError).unwrap();

        assert!(matches!(m.kernel_of(0), Err(Error::UnsupportedOperation(_))));
        assert_eq!(m.kernel_of(1).unwrap().shape(), &[4, 2]);
        assert!(m.bias_of(1).unwrap().is_none());
        assert!(matches!(m.layer(2), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn output_is_observable_between_steps() {
        let mut m = Sequential::new();
        m.add(Dense::new(2, Activation::Linear).unwrap());
        m.compile(&[1], gd(), Loss::MeanSquaredError).unwrap();
        let y = m.forward(&tensor!([1.0])).unwrap().to_vec();

        assert_eq!(m.output_array().unwrap(), y);
        let mut buf = [0.0; 2];
        m.copy_output_into(&mut buf).unwrap();
        assert_eq!(buf.to_vec(), y);
        assert!(m.copy_output_into(&mut [0.0; 3]).is_err());
    }

    #[test]
    fn parameters_and_gradients_follow_layer_order() {
        let mut m = Sequential::new();
        m.add(Dense::new(3, Activation::Linear).unwrap());
        m.add(Flatten::new());
        m.add(Dense::new(1, Activation::Linear).unwrap().with_bias(false));
        m.compile(&[2], gd(), Loss::MeanSquaredError).unwrap();

        let shapes: Vec<Vec<usize>> = m.parameters().unwrap().iter().map(|t| t.shape().to_vec()).collect();
        assert_eq!(shapes, vec![vec![2, 3], vec![3], vec![3, 1]]);
        assert!(m.parameters().unwrap()[0].shares_cells(m.kernel_of(0).unwrap()));

        m.forward(&tensor!([1.0, 2.0])).unwrap();
        m.backward(&tensor!([[1.0]])).unwrap();
        let grads = m.gradients().unwrap();
        assert_eq!(grads.len(), 3);
        for (g, p) in grads.iter().zip(m.parameters().unwrap()) {
            assert_eq!(g.shape(), p.shape());
        }
        assert_eq!(grads[1].to_vec(), m.kernel_of(2).unwrap().to_vec());
    }

    #[test]
    fn duplicate_is_independent() {
        let mut m = Sequential::new();
        m.configure(TrainConfig::default().with_seed(4)).unwrap();
        m.add(Dense::new(2, Activation::Tanh).unwrap());
        m.compile(&[2], gd(), Loss::MeanAbsoluteError).unwrap();

        let mut copy = m.duplicate();
        assert!(copy.is_compiled());
        assert_eq!(copy.loss(), Loss::MeanAbsoluteError);
        assert_eq!(copy.kernel_of(0).unwrap(), m.kernel_of(0).unwrap());
        assert!(!copy.kernel_of(0).unwrap().shares_cells(m.kernel_of(0).unwrap()));

        let before = m.kernel_of(0).unwrap().clone();
        copy.train(&[tensor!([1.0, -1.0])], &[tensor!([0.5, 0.5])], 3, 1).unwrap();
        assert_ne!(copy.kernel_of(0).unwrap(), &before);
        assert_eq!(m.kernel_of(0).unwrap(), &before);
    }

    #[test]
    fn backward_returns_input_gradient() {
        let mut m = Sequential::new();
        m.add(Dense::new(1, Activation::Linear).unwrap().with_bias(false));
        m.compile(&[2], gd(), Loss::MeanSquaredError).unwrap();
        m.forward(&tensor!([1.0, 1.0])).unwrap();
        let k = m.kernel_of(0).unwrap().to_vec();
        let dx = m.backward(&tensor!([2.0])).unwrap().to_vec();
        assert_eq!(dx, vec![2.0 * k[0], 2.0 * k[1]]);

        m.zero_grad().unwrap();
        let grad = m.layer(0).unwrap().as_trainable().unwrap().grad_kernel().unwrap().sum();
        assert_eq!(grad, 0.0);
    }
}
