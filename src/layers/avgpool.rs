#![allow(clippy::cast_precision_loss)]
//! Average pooling over `(channels, height, width)` inputs.

use super::{Duplicable, Layer, LayerKind, Named, expect_shape, image_dims, out_extent, positive};
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Per-channel average pooling.
///
/// Each output cell is the mean of its `[fh, fw]` window, divided by the
/// number of cells actually inside the input. The stride defaults to the
/// window size. `backward` spreads every window's gradient evenly over its
/// cells; overlapping windows add up.
#[derive(Debug, Clone)]
pub struct AvgPool {
    window: [usize; 2],
    stride: [usize; 2],
    id: usize,
    training: bool,
    state: Option<State>,
}

#[derive(Debug, Clone)]
struct State {
    input_dims: [usize; 3],
    output_dims: [usize; 3],
    output: Tensor,
    grad_input: Tensor,
}

impl AvgPool {
    /// Creates an unbuilt layer with an `[fh, fw]` window and matching
    /// stride.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on a zero window dimension.
    pub fn new(window: [usize; 2]) -> Result<Self> {
        positive("avg pool window", &window)?;
        Ok(Self {
            window,
            stride: window,
            id: 0,
            training: false,
            state: None,
        })
    }

    /// Sets the `[sh, sw]` stride.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on a zero stride.
    pub fn with_stride(mut self, stride: [usize; 2]) -> Result<Self> {
        positive("avg pool stride", &stride)?;
        self.stride = stride;
        Ok(self)
    }

    /// `[fh, fw]`.
    #[must_use]
    pub fn window(&self) -> [usize; 2] {
        self.window
    }

    /// `[sh, sw]`.
    #[must_use]
    pub fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn state(&self) -> Result<&State> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::not_built(format!("AvgPool layer {}", self.id)))
    }

    fn state_mut(&mut self) -> Result<&mut State> {
        let id = self.id;
        self.state
            .as_mut()
            .ok_or_else(|| Error::not_built(format!("AvgPool layer {id}")))
    }
}

/// Clipped `(rows, cols)` ranges of the window at output `(oy, ox)`.
fn bounds(
    window: [usize; 2],
    stride: [usize; 2],
    dims: [usize; 3],
    oy: usize,
    ox: usize,
) -> ([usize; 2], [usize; 2]) {
    let [_, h, w] = dims;
    let (y0, x0) = (oy * stride[0], ox * stride[1]);
    ([y0, (y0 + window[0]).min(h)], [x0, (x0 + window[1]).min(w)])
}

impl Named for AvgPool {
    fn name(&self) -> &'static str {
        "AvgPool"
    }
}

impl Duplicable for AvgPool {
    fn duplicate(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn fork(&self) -> Box<dyn Layer> {
        self.duplicate()
    }
}

impl Layer for AvgPool {
    fn kind(&self) -> LayerKind {
        LayerKind::AvgPool
    }

    fn build(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::config(format!("AvgPool layer {} is already built", self.id)));
        }
        let [c, h, w] = image_dims("AvgPool", input_shape, self.window)?;
        let output_dims = [
            c,
            out_extent(h, self.window[0], self.stride[0]),
            out_extent(w, self.window[1], self.stride[1]),
        ];
        self.state = Some(State {
            input_dims: [c, h, w],
            output_dims,
            output: Tensor::zeros(&output_dims)?,
            grad_input: Tensor::zeros(input_shape)?,
        });
        log::debug!(
            "built AvgPool layer {} ({input_shape:?} -> {output_dims:?}, window {:?}, stride {:?})",
            self.id,
            self.window,
            self.stride
        );
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let (window, stride) = (self.window, self.stride);
        let s = self.state_mut()?;
        expect_shape(input, &s.input_dims)?;

        let [channels, oh, ow] = s.output_dims;
        let [_, h, w] = s.input_dims;
        for c in 0..channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let ([y0, y1], [x0, x1]) = bounds(window, stride, s.input_dims, oy, ox);
                    let mut acc = 0.0;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            acc += input.get_flat((c * h + y) * w + x);
                        }
                    }
                    let count = ((y1 - y0) * (x1 - x0)) as f64;
                    s.output.set_flat((c * oh + oy) * ow + ox, acc / count);
                }
            }
        }
        Ok(&s.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let (window, stride) = (self.window, self.stride);
        let s = self.state_mut()?;
        expect_shape(grad, &s.output_dims)?;

        s.grad_input.zero();
        let [channels, oh, ow] = s.output_dims;
        let [_, h, w] = s.input_dims;
        for c in 0..channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let ([y0, y1], [x0, x1]) = bounds(window, stride, s.input_dims, oy, ox);
                    let count = ((y1 - y0) * (x1 - x0)) as f64;
                    let share = grad.get_flat((c * oh + oy) * ow + ox) / count;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            s.grad_input.add_flat((c * h + y) * w + x, share);
                        }
                    }
                }
            }
        }
        Ok(&s.grad_input)
    }

    fn input_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.input_dims)
    }

    fn output_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.output_dims)
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

    fn geometry(&self) -> Option<super::Geometry> {
        Some(super::Geometry {
            window: self.window,
            stride: self.stride,
        })
    }
}
