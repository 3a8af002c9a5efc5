//! Flattening layer.

use super::{Duplicable, Layer, LayerKind, Named, expect_shape, positive};
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Reshapes any input into a single row `[1, n]`.
///
/// The output is a reshaped view of the layer's input cache, so `forward`
/// copies once and never rearranges values. Typically placed between the
/// last pooling layer and the first [`Dense`](super::Dense) layer.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    id: usize,
    training: bool,
    state: Option<State>,
}

#[derive(Debug)]
struct State {
    input_shape: Vec<usize>,
    output_shape: [usize; 2],
    input: Tensor,
    output: Tensor,
    grad_input: Tensor,
}

impl Clone for State {
    // the output must stay a view of the *new* input cache
    fn clone(&self) -> Self {
        let input = self.input.clone();
        let output = input.as_row();
        Self {
            input_shape: self.input_shape.clone(),
            output_shape: self.output_shape,
            output,
            input,
            grad_input: self.grad_input.clone(),
        }
    }
}

impl Flatten {
    /// Creates an unbuilt layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<&State> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::not_built(format!("Flatten layer {}", self.id)))
    }

    fn state_mut(&mut self) -> Result<&mut State> {
        let id = self.id;
        self.state
            .as_mut()
            .ok_or_else(|| Error::not_built(format!("Flatten layer {id}")))
    }
}

impl Named for Flatten {
    fn name(&self) -> &'static str {
        "Flatten"
    }
}

impl Duplicable for Flatten {
    fn duplicate(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn fork(&self) -> Box<dyn Layer> {
        self.duplicate()
    }
}

impl Layer for Flatten {
    fn kind(&self) -> LayerKind {
        LayerKind::Flatten
    }

    fn build(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::config(format!("Flatten layer {} is already built", self.id)));
        }
        positive("flatten input dimensions", input_shape)?;
        let input = Tensor::zeros(input_shape)?;
        let output_shape = [1, input.len()];
        self.state = Some(State {
            input_shape: input_shape.to_vec(),
            output_shape,
            output: input.as_row(),
            input,
            grad_input: Tensor::zeros(input_shape)?,
        });
        log::debug!("built Flatten layer {} ({input_shape:?} -> {output_shape:?})", self.id);
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let s = self.state_mut()?;
        expect_shape(input, &s.input_shape)?;
        s.input.copy_from(input)?;
        Ok(&s.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let s = self.state_mut()?;
        expect_shape(grad, &s.output_shape)?;
        for p in 0..grad.len() {
            s.grad_input.set_flat(p, grad.get_flat(p));
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

    fn num_params(&self) -> usize {
        0
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
}
