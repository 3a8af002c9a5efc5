//! Fully connected layer.

use super::{Duplicable, Layer, LayerKind, Named, Params, expect_shape, impl_trainable, positive};
use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::tensors::Tensor;

/// A fully connected layer.
///
/// Performs a left-hand multiplication: `output = act(input · W + b)`.
///
/// - input `[n]` gives output `[units]`
/// - input `[rows, n]` gives output `[rows, units]`, every row going through
///   the same kernel
///
/// The kernel has shape `[n, units]` and the bias `[units]`.
///
/// # Example
///
/// ```rust
/// use cellnet::activation::Activation;
/// use cellnet::layers::{Dense, Layer};
/// use cellnet::tensor;
///
/// let mut dense = Dense::new(2, Activation::Linear).unwrap();
/// dense.build(&[3]).unwrap();
/// let out = dense.forward(&tensor!([1.0, 2.0, 3.0])).unwrap();
/// assert_eq!(out.shape(), &[2]);
/// ```
#[derive(Debug, Clone)]
pub struct Dense {
    units: usize,
    activation: Activation,
    use_bias: bool,
    kernel_init: Initializer,
    bias_init: Initializer,
    id: usize,
    training: bool,
    state: Option<State>,
}

#[derive(Debug, Clone)]
struct State {
    rows: usize,
    inputs: usize,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    params: Params,
    input: Tensor,
    z: Tensor,
    output: Tensor,
    delta: Tensor,
    grad_input: Tensor,
}

impl Dense {
    /// Creates an unbuilt layer with `units` outputs per row.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `units` is zero.
    pub fn new(units: usize, activation: Activation) -> Result<Self> {
        positive("dense units", &[units])?;
        Ok(Self {
            units,
            activation,
            use_bias: true,
            kernel_init: Initializer::Xavier,
            bias_init: Initializer::Zeros,
            id: 0,
            training: false,
            state: None,
        })
    }

    /// Enables or disables the bias.
    #[must_use]
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Sets the kernel initializer.
    #[must_use]
    pub fn with_kernel_init(mut self, init: Initializer) -> Self {
        self.kernel_init = init;
        self
    }

    /// Sets the bias initializer.
    #[must_use]
    pub fn with_bias_init(mut self, init: Initializer) -> Self {
        self.bias_init = init;
        self
    }

    /// Number of output units per row.
    #[must_use]
    pub fn units(&self) -> usize {
        self.units
    }

    fn state(&self) -> Result<&State> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::not_built(format!("Dense layer {}", self.id)))
    }

    fn state_mut(&mut self) -> Result<&mut State> {
        let id = self.id;
        self.state
            .as_mut()
            .ok_or_else(|| Error::not_built(format!("Dense layer {id}")))
    }

    fn params(&self) -> Result<&Params> {
        Ok(&self.state()?.params)
    }

    fn params_mut(&mut self) -> Result<&mut Params> {
        Ok(&mut self.state_mut()?.params)
    }
}

impl_trainable!(Dense);

impl Named for Dense {
    fn name(&self) -> &'static str {
        "Dense"
    }
}

impl Duplicable for Dense {
    fn duplicate(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn fork(&self) -> Box<dyn Layer> {
        Box::new(Self {
            state: self.state.as_ref().map(State::fork),
            ..self.config()
        })
    }
}

impl Dense {
    fn config(&self) -> Self {
        Self {
            state: None,
            ..*self
        }
    }
}

impl State {
    fn fork(&self) -> Self {
        Self {
            input_shape: self.input_shape.clone(),
            output_shape: self.output_shape.clone(),
            params: self.params.fork(),
            input: self.input.clone(),
            z: self.z.clone(),
            output: self.output.clone(),
            delta: self.delta.clone(),
            grad_input: self.grad_input.clone(),
            ..*self
        }
    }
}

impl Layer for Dense {
    fn kind(&self) -> LayerKind {
        LayerKind::Dense
    }

    fn build(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::config(format!("Dense layer {} is already built", self.id)));
        }
        let (rows, inputs) = match *input_shape {
            [n] => (1, n),
            [rows, n] => (rows, n),
            _ => {
                return Err(Error::config(format!(
                    "Dense expects a [n] or [rows, n] input, got {input_shape:?}"
                )));
            }
        };
        positive("dense input dimensions", input_shape)?;

        let mut output_shape = input_shape.to_vec();
        if let Some(last) = output_shape.last_mut() {
            *last = self.units;
        }
        let bias_shape = [self.units];
        self.state = Some(State {
            rows,
            inputs,
            params: Params::new(&[inputs, self.units], self.use_bias.then_some(&bias_shape[..]))?,
            input: Tensor::zeros(input_shape)?,
            z: Tensor::zeros(&output_shape)?,
            output: Tensor::zeros(&output_shape)?,
            delta: Tensor::zeros(&output_shape)?,
            grad_input: Tensor::zeros(input_shape)?,
            input_shape: input_shape.to_vec(),
            output_shape,
        });
        log::debug!(
            "built Dense layer {} ({input_shape:?} -> {} units, bias: {})",
            self.id,
            self.units,
            self.use_bias
        );
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let act = self.activation;
        let units = self.units;
        let s = self.state_mut()?;
        expect_shape(input, &s.input_shape)?;
        s.input.copy_from(input)?;

        let (rows, n) = (s.rows, s.inputs);
        for r in 0..rows {
            for j in 0..units {
                let mut acc = s.params.bias.as_ref().map_or(0.0, |b| b.get_flat(j));
                for i in 0..n {
                    acc += s.input.get_flat(r * n + i) * s.params.kernel.get_flat(i * units + j);
                }
                s.z.set_flat(r * units + j, acc);
            }
        }
        act.activate(&s.z, &mut s.output)?;
        Ok(&s.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let act = self.activation;
        let units = self.units;
        let s = self.state_mut()?;
        expect_shape(grad, &s.output_shape)?;

        // g = grad ⊙ act'(z, y)
        act.chain(grad, &s.z, &s.output, &mut s.delta)?;

        let (rows, n) = (s.rows, s.inputs);
        let Params {
            kernel,
            grad_kernel,
            grad_bias,
            ..
        } = &mut s.params;

        // dW += xᵀ · g
        for i in 0..n {
            for j in 0..units {
                let mut acc = 0.0;
                for r in 0..rows {
                    acc += s.input.get_flat(r * n + i) * s.delta.get_flat(r * units + j);
                }
                grad_kernel.add_flat(i * units + j, acc);
            }
        }

        // db += column sums of g
        if let Some(gb) = grad_bias.as_mut() {
            for j in 0..units {
                let col: f64 = (0..rows).map(|r| s.delta.get_flat(r * units + j)).sum();
                gb.add_flat(j, col);
            }
        }

        // dx = g · Wᵀ
        for r in 0..rows {
            for i in 0..n {
                let mut acc = 0.0;
                for j in 0..units {
                    acc += s.delta.get_flat(r * units + j) * kernel.get_flat(i * units + j);
                }
                s.grad_input.set_flat(r * n + i, acc);
            }
        }
        Ok(&s.grad_input)
    }

    fn input_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.input_shape)
    }

    fn output_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.output_shape)
    }

    fn output(&self) -> Result<&Tensor> {
        Ok(&self.state()?.output)
    }

    fn grad_input(&self) -> Result<&Tensor> {
        Ok(&self.state()?.grad_input)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn id(&self) -> usize {
        self.id
    }

    fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    fn as_trainable(&self) -> Option<&dyn super::Trainable> {
        Some(self)
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn super::Trainable> {
        Some(self)
    }
}
