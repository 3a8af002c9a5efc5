//! 2-D convolution over `(channels, height, width)` inputs.

use super::{
    Duplicable, Layer, LayerKind, Named, Params, expect_shape, image_dims, impl_trainable,
    out_extent, positive,
};
use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::tensors::Tensor;

/// A 2-D convolutional layer (valid cross-correlation, no padding).
///
/// - input: `(C, H, W)`
/// - kernel: `[F, C, kh, kw]`
/// - bias: `[F]`
/// - output: `(F, (H - kh) / sh + 1, (W - kw) / sw + 1)`
///
/// # Example
///
/// ```rust
/// use cellnet::activation::Activation;
/// use cellnet::layers::{Conv, Layer, Trainable};
/// use cellnet::tensor;
///
/// let mut conv = Conv::new(1, [2, 2], Activation::Linear).unwrap().with_bias(false);
/// conv.build(&[1, 3, 3]).unwrap();
/// conv.load_kernel(&[1.0; 4]).unwrap();
/// let x = tensor!([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
/// let y = conv.forward(&x).unwrap();
/// assert_eq!(y, &tensor!([[[12.0, 16.0], [24.0, 28.0]]]));
/// ```
#[derive(Debug, Clone)]
pub struct Conv {
    filters: usize,
    kernel_size: [usize; 2],
    stride: [usize; 2],
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
    input_dims: [usize; 3],
    output_dims: [usize; 3],
    params: Params,
    input: Tensor,
    z: Tensor,
    output: Tensor,
    delta: Tensor,
    grad_input: Tensor,
}

impl Conv {
    /// Creates an unbuilt layer with `filters` output channels and a
    /// `[kh, kw]` kernel, stride one.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on zero filters or kernel dimensions.
    pub fn new(filters: usize, kernel_size: [usize; 2], activation: Activation) -> Result<Self> {
        positive("conv filters", &[filters])?;
        positive("conv kernel size", &kernel_size)?;
        Ok(Self {
            filters,
            kernel_size,
            stride: [1, 1],
            activation,
            use_bias: true,
            kernel_init: Initializer::He,
            bias_init: Initializer::Zeros,
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
        positive("conv stride", &stride)?;
        self.stride = stride;
        Ok(self)
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

    /// Number of filters.
    #[must_use]
    pub fn filters(&self) -> usize {
        self.filters
    }

    /// `[kh, kw]`.
    #[must_use]
    pub fn kernel_size(&self) -> [usize; 2] {
        self.kernel_size
    }

    /// `[sh, sw]`.
    #[must_use]
    pub fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn state(&self) -> Result<&State> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::not_built(format!("Conv layer {}", self.id)))
    }

    fn state_mut(&mut self) -> Result<&mut State> {
        let id = self.id;
        self.state
            .as_mut()
            .ok_or_else(|| Error::not_built(format!("Conv layer {id}")))
    }

    fn params(&self) -> Result<&Params> {
        Ok(&self.state()?.params)
    }

    fn params_mut(&mut self) -> Result<&mut Params> {
        Ok(&mut self.state_mut()?.params)
    }
}

impl_trainable!(Conv);

impl Named for Conv {
    fn name(&self) -> &'static str {
        "Conv"
    }
}

impl Duplicable for Conv {
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

impl Conv {
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

impl Layer for Conv {
    fn kind(&self) -> LayerKind {
        LayerKind::Conv
    }

    fn build(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::config(format!("Conv layer {} is already built", self.id)));
        }
        let [c, h, w] = image_dims("Conv", input_shape, self.kernel_size)?;
        let [kh, kw] = self.kernel_size;
        let [sh, sw] = self.stride;
        let output_dims = [self.filters, out_extent(h, kh, sh), out_extent(w, kw, sw)];
        let bias_shape = [self.filters];

        self.state = Some(State {
            input_dims: [c, h, w],
            output_dims,
            params: Params::new(
                &[self.filters, c, kh, kw],
                self.use_bias.then_some(&bias_shape[..]),
            )?,
            input: Tensor::zeros(input_shape)?,
            z: Tensor::zeros(&output_dims)?,
            output: Tensor::zeros(&output_dims)?,
            delta: Tensor::zeros(&output_dims)?,
            grad_input: Tensor::zeros(input_shape)?,
        });
        log::debug!(
            "built Conv layer {} ({input_shape:?} -> {output_dims:?}, kernel {:?}, stride {:?})",
            self.id,
            self.kernel_size,
            self.stride
        );
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let act = self.activation;
        let [kh, kw] = self.kernel_size;
        let [sh, sw] = self.stride;
        let s = self.state_mut()?;
        expect_shape(input, &s.input_dims)?;
        s.input.copy_from(input)?;

        let [c_in, h, w] = s.input_dims;
        let [filters, oh, ow] = s.output_dims;
        for f in 0..filters {
            let b = s.params.bias.as_ref().map_or(0.0, |b| b.get_flat(f));
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = b;
                    for c in 0..c_in {
                        for i in 0..kh {
                            let row = (c * h + oy * sh + i) * w + ox * sw;
                            let krow = ((f * c_in + c) * kh + i) * kw;
                            for j in 0..kw {
                                acc += s.input.get_flat(row + j) * s.params.kernel.get_flat(krow + j);
                            }
                        }
                    }
                    s.z.set_flat((f * oh + oy) * ow + ox, acc);
                }
            }
        }
        act.activate(&s.z, &mut s.output)?;
        Ok(&s.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let act = self.activation;
        let [kh, kw] = self.kernel_size;
        let [sh, sw] = self.stride;
        let s = self.state_mut()?;
        expect_shape(grad, &s.output_dims)?;

        act.chain(grad, &s.z, &s.output, &mut s.delta)?;

        let [c_in, h, w] = s.input_dims;
        let [filters, oh, ow] = s.output_dims;
        let Params {
            kernel,
            grad_kernel,
            grad_bias,
            ..
        } = &mut s.params;

        s.grad_input.zero();
        // filters, then channels, then output cells: a fixed summation order
        for f in 0..filters {
            for c in 0..c_in {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let g = s.delta.get_flat((f * oh + oy) * ow + ox);
                        for i in 0..kh {
                            let row = (c * h + oy * sh + i) * w + ox * sw;
                            let krow = ((f * c_in + c) * kh + i) * kw;
                            for j in 0..kw {
                                grad_kernel.add_flat(krow + j, s.input.get_flat(row + j) * g);
                                s.grad_input.add_flat(row + j, kernel.get_flat(krow + j) * g);
                            }
                        }
                    }
                }
            }
            if let Some(gb) = grad_bias.as_mut() {
                let plane: f64 = (0..oh * ow).map(|p| s.delta.get_flat(f * oh * ow + p)).sum();
                gb.add_flat(f, plane);
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
            window: self.kernel_size,
            stride: self.stride,
        })
    }

    fn as_trainable(&self) -> Option<&dyn super::Trainable> {
        Some(self)
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn super::Trainable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Trainable;
    use crate::tensor;

    fn ones_2x2() -> Conv {
        let mut conv = Conv::new(1, [2, 2], Activation::Linear).unwrap().with_bias(false);
        conv.build(&[1, 3, 3]).unwrap();
        conv.load_kernel(&[1.0; 4]).unwrap();
        conv
    }

    #[test]
    fn sums_each_window() {
        let mut conv = ones_2x2();
        let x = tensor!([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
        let y = conv.forward(&x).unwrap();
        assert_eq!(y, &tensor!([[[12.0, 16.0], [24.0, 28.0]]]));
    }

    #[test]
    fn backward_scatters_into_overlapping_cells() {
        let mut conv = ones_2x2();
        let x = tensor!([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
        conv.forward(&x).unwrap();
        let dx = conv.backward(&Tensor::filled(&[1, 2, 2], 1.0).unwrap()).unwrap();
        assert_eq!(
            dx.to_vec(),
            vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
        );
        // dK[i, j] = sum of the input window shifted by (i, j)
        assert_eq!(conv.grad_kernel().unwrap().to_vec(), vec![12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn strided_output_shape() {
        let mut conv = Conv::new(4, [3, 3], Activation::ReLU)
            .unwrap()
            .with_stride([2, 2])
            .unwrap();
        conv.build(&[2, 7, 9]).unwrap();
        assert_eq!(conv.output_shape().unwrap(), &[4, 3, 4]);
        assert_eq!(conv.kernel().unwrap().shape(), &[4, 2, 3, 3]);
        assert_eq!(conv.num_params(), 4 * 2 * 9 + 4);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        assert!(Conv::new(0, [2, 2], Activation::Linear).is_err());
        assert!(Conv::new(1, [0, 2], Activation::Linear).is_err());
        assert!(
            Conv::new(1, [2, 2], Activation::Linear)
                .unwrap()
                .with_stride([1, 0])
                .is_err()
        );

        let mut conv = Conv::new(1, [4, 4], Activation::Linear).unwrap();
        assert!(matches!(conv.build(&[1, 3, 3]), Err(Error::Configuration(_))));
        assert!(matches!(conv.build(&[3, 3]), Err(Error::Configuration(_))));
    }

    #[test]
    fn bias_gradient_sums_each_plane() {
        let mut conv = Conv::new(2, [1, 1], Activation::Linear).unwrap();
        conv.build(&[1, 2, 2]).unwrap();
        conv.forward(&Tensor::zeros(&[1, 2, 2]).unwrap()).unwrap();
        let g = tensor!([[[1.0, 2.0], [3.0, 4.0]], [[0.5, 0.5], [0.5, 0.5]]]);
        conv.backward(&g).unwrap();
        assert_eq!(conv.grad_bias().unwrap().unwrap().to_vec(), vec![10.0, 2.0]);
    }
}
