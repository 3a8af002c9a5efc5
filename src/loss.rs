#![allow(clippy::cast_precision_loss)]
//! Loss functions.
//!
//! Each [`Loss`] reports a scalar value for one prediction/target pair and
//! the gradient of that value with respect to the prediction, which is what
//! the training loop feeds into the last layer's `backward`.

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Clamp applied to probabilities before taking logarithms.
const PROB_EPS: f64 = 1e-7;

/// An enumeration of loss functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Loss {
    /// Mean of squared errors.
    MeanSquaredError,
    /// Mean of absolute errors.
    MeanAbsoluteError,
    /// Mean binary cross-entropy; predictions are probabilities.
    BinaryCrossEntropy,
    /// `-Σ t·ln(p)` summed over every element.
    CategoricalCrossEntropy,
    /// Mean Huber loss: quadratic within `delta` of the target, linear
    /// outside.
    Huber {
        /// Switch point between the quadratic and linear regions.
        delta: f64,
    },
}

#[inline]
fn clamp_prob(p: f64) -> f64 {
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

impl Loss {
    fn check(pred: &Tensor, target: &Tensor) -> Result<()> {
        if pred.same_shape(target) {
            Ok(())
        } else {
            Err(Error::shape(pred.shape(), target.shape()))
        }
    }

    /// Loss of `pred` against `target`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn value(self, pred: &Tensor, target: &Tensor) -> Result<f64> {
        Self::check(pred, target)?;
        let n = pred.len() as f64;
        let pairs = pred.iter().zip(target.iter());
        Ok(match self {
            Self::MeanSquaredError => pairs.map(|(p, t)| (p - t) * (p - t)).sum::<f64>() / n,
            Self::MeanAbsoluteError => pairs.map(|(p, t)| (p - t).abs()).sum::<f64>() / n,
            Self::BinaryCrossEntropy => {
                -pairs
                    .map(|(p, t)| {
                        let p = clamp_prob(p);
                        t * p.ln() + (1.0 - t) * (1.0 - p).ln()
                    })
                    .sum::<f64>()
                    / n
            }
            Self::CategoricalCrossEntropy => -pairs.map(|(p, t)| t * clamp_prob(p).ln()).sum::<f64>(),
            Self::Huber { delta } => {
                pairs
                    .map(|(p, t)| {
                        let r = (p - t).abs();
                        if r <= delta {
                            0.5 * r * r
                        } else {
                            delta * (r - 0.5 * delta)
                        }
                    })
                    .sum::<f64>()
                    / n
            }
        })
    }

    /// Gradient of [`Loss::value`] with respect to `pred`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn gradient(self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        let mut out = Tensor::zeros(pred.shape())?;
        self.gradient_into(pred, target, &mut out)?;
        Ok(out)
    }

    /// Writes the gradient of [`Loss::value`] into `out`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the three shapes differ.
    pub fn gradient_into(self, pred: &Tensor, target: &Tensor, out: &mut Tensor) -> Result<()> {
        Self::check(pred, target)?;
        Self::check(pred, out)?;
        let n = pred.len() as f64;
        for i in 0..pred.len() {
            let (p, t) = (pred.get_flat(i), target.get_flat(i));
            let g = match self {
                Self::MeanSquaredError => 2.0 * (p - t) / n,
                Self::MeanAbsoluteError => {
                    if p > t {
                        1.0 / n
                    } else if p < t {
                        -1.0 / n
                    } else {
                        0.0
                    }
                }
                Self::BinaryCrossEntropy => {
                    let p = clamp_prob(p);
                    (p - t) / (p * (1.0 - p)) / n
                }
                Self::CategoricalCrossEntropy => -t / clamp_prob(p),
                Self::Huber { delta } => {
                    let r = p - t;
                    if r.abs() <= delta { r / n } else { delta * r.signum() / n }
                }
            };
            out.set_flat(i, g);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn mse_value_and_gradient() {
        let p = tensor!([1.0, 2.0]);
        let t = tensor!([0.0, 4.0]);
        assert_eq!(Loss::MeanSquaredError.value(&p, &t).unwrap(), 2.5);
        assert_eq!(
            Loss::MeanSquaredError.gradient(&p, &t).unwrap().to_vec(),
            vec![1.0, -2.0]
        );
    }

    #[test]
    fn gradients_match_finite_differences() {
        let losses = [
            Loss::MeanSquaredError,
            Loss::MeanAbsoluteError,
            Loss::BinaryCrossEntropy,
            Loss::CategoricalCrossEntropy,
            Loss::Huber { delta: 0.5 },
        ];
        let target = tensor!([0.0, 1.0, 0.0]);
        let h = 1e-6;
        for loss in losses {
            let pred = tensor!([0.2, 0.7, 0.9]);
            let grad = loss.gradient(&pred, &target).unwrap();
            for i in 0..pred.len() {
                let mut hi = pred.clone();
                hi.add_flat(i, h);
                let mut lo = pred.clone();
                lo.add_flat(i, -h);
                let numeric =
                    (loss.value(&hi, &target).unwrap() - loss.value(&lo, &target).unwrap()) / (2.0 * h);
                assert!(
                    (numeric - grad.get_flat(i)).abs() < 1e-5,
                    "{loss:?}[{i}]: {numeric} vs {}",
                    grad.get_flat(i)
                );
            }
        }
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let p = tensor!([1.0, 2.0]);
        let t = tensor!([[1.0, 2.0]]);
        assert!(matches!(
            Loss::MeanAbsoluteError.value(&p, &t),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
