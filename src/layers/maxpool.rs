//! Max pooling over `(channels, height, width)` inputs.

use super::{Duplicable, Layer, LayerKind, Named, expect_shape, image_dims, out_extent, positive};
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Per-channel max pooling.
///
/// Each output cell is the largest value in its `[fh, fw]` window. The
/// stride defaults to the window size. Window upper bounds are clipped to
/// the input.
///
/// `backward` rescans the cached input of the last `forward` and routes each
/// window's gradient to its arg-max, the first strictly greater value in
/// row-major order. When windows overlap, gradients routed to the same cell
/// add up.
#[derive(Debug, Clone)]
pub struct MaxPool {
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
    input: Tensor,
    output: Tensor,
    grad_input: Tensor,
}

impl MaxPool {
    /// Creates an unbuilt layer with an `[fh, fw]` window and matching
    /// stride.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on a zero window dimension.
    pub fn new(window: [usize; 2]) -> Result<Self> {
        positive("max pool window", &window)?;
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
        positive("max pool stride", &stride)?;
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
            .ok_or_else(|| Error::not_built(format!("MaxPool layer {}", self.id)))
    }

    fn state_mut(&mut self) -> Result<&mut State> {
        let id = self.id;
        self.state
            .as_mut()
            .ok_or_else(|| Error::not_built(format!("MaxPool layer {id}")))
    }
}

impl Named for MaxPool {
    fn name(&self) -> &'static str {
        "MaxPool"
    }
}

impl Duplicable for MaxPool {
    fn duplicate(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    // nothing to share
    fn fork(&self) -> Box<dyn Layer> {
        self.duplicate()
    }
}

/// Position of the first maximum of channel `c`'s window at `(y0, x0)`.
fn arg_max(input: &Tensor, dims: [usize; 3], c: usize, y0: usize, x0: usize, window: [usize; 2]) -> usize {
    let [_, h, w] = dims;
    let (y1, x1) = ((y0 + window[0]).min(h), (x0 + window[1]).min(w));
    let mut best = (c * h + y0) * w + x0;
    let mut best_val = input.get_flat(best);
    for y in y0..y1 {
        for x in x0..x1 {
            let p = (c * h + y) * w + x;
            let v = input.get_flat(p);
            if v > best_val {
                best = p;
                best_val = v;
            }
        }
    }
    best
}

impl Layer for MaxPool {
    fn kind(&self) -> LayerKind {
        LayerKind::MaxPool
    }

    fn build(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::config(format!("MaxPool layer {} is already built", self.id)));
        }
        let [c, h, w] = image_dims("MaxPool", input_shape, self.window)?;
        let output_dims = [
            c,
            out_extent(h, self.window[0], self.stride[0]),
            out_extent(w, self.window[1], self.stride[1]),
        ];
        self.state = Some(State {
            input_dims: [c, h, w],
            output_dims,
            input: Tensor::zeros(input_shape)?,
            output: Tensor::zeros(&output_dims)?,
            grad_input: Tensor::zeros(input_shape)?,
        });
        log::debug!(
            "built MaxPool layer {} ({input_shape:?} -> {output_dims:?}, window {:?}, stride {:?})",
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
        let (window, [sh, sw]) = (self.window, self.stride);
        let s = self.state_mut()?;
        expect_shape(input, &s.input_dims)?;
        s.input.copy_from(input)?;

        let [channels, oh, ow] = s.output_dims;
        for c in 0..channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let p = arg_max(&s.input, s.input_dims, c, oy * sh, ox * sw, window);
                    s.output.set_flat((c * oh + oy) * ow + ox, s.input.get_flat(p));
                }
            }
        }
        Ok(&s.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let (window, [sh, sw]) = (self.window, self.stride);
        let s = self.state_mut()?;
        expect_shape(grad, &s.output_dims)?;

        s.grad_input.zero();
        let [channels, oh, ow] = s.output_dims;
        for c in 0..channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let p = arg_max(&s.input, s.input_dims, c, oy * sh, ox * sw, window);
                    s.grad_input.add_flat(p, grad.get_flat((c * oh + oy) * ow + ox));
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
