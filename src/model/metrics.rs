#![allow(clippy::cast_precision_loss)]
//! Evaluation metrics.
//!
//! Every metric runs the dataset through [`Sequential::forward_all`], so it
//! leaves the model's own buffers alone and uses the configured worker
//! count.
//!
//! Classification metrics read a class out of every output and target:
//! the position of the largest value, or for single-value outputs whether
//! the value reaches `0.5`.

use super::Sequential;
use super::train::check_dataset;
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::tensors::Tensor;

/// Output value from which a single-value output counts as class 1.
const THRESHOLD: f64 = 0.5;

fn class_of(t: &Tensor) -> usize {
    if t.len() == 1 {
        usize::from(t.get_flat(0) >= THRESHOLD)
    } else {
        t.argmax()
    }
}

impl Sequential {
    /// Mean of `loss` over a dataset, whatever loss the model trains with.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] on mismatched or empty datasets
    /// - any error from [`Sequential::forward_all`] or the loss
    pub fn evaluate_with(&self, loss: Loss, inputs: &[Tensor], targets: &[Tensor]) -> Result<f64> {
        let outputs = self.predictions(inputs, targets)?;
        let mut total = 0.0;
        for (out, y) in outputs.iter().zip(targets) {
            total += loss.value(out, y)?;
        }
        Ok(total / inputs.len() as f64)
    }

    /// Fraction of examples whose predicted class equals the target class.
    ///
    /// # Errors
    ///
    /// As [`Sequential::confusion_matrix`].
    pub fn accuracy(&self, inputs: &[Tensor], targets: &[Tensor]) -> Result<f64> {
        let matrix = self.confusion_matrix(inputs, targets)?;
        let hits: usize = (0..matrix.len()).map(|c| matrix[c][c]).sum();
        Ok(hits as f64 / inputs.len() as f64)
    }

    /// Counts of (target class, predicted class) pairs.
    ///
    /// `matrix[t][p]` is the number of examples of class `t` predicted as
    /// `p`. The matrix is square with one row per output value, or two
    /// rows for single-value outputs.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] on mismatched or empty datasets
    /// - [`Error::ShapeMismatch`] if a target does not match the output
    ///   shape
    /// - any error from [`Sequential::forward_all`]
    pub fn confusion_matrix(&self, inputs: &[Tensor], targets: &[Tensor]) -> Result<Vec<Vec<usize>>> {
        let outputs = self.predictions(inputs, targets)?;
        let classes = self.output_shape()?.iter().product::<usize>().max(2);
        let mut matrix = vec![vec![0; classes]; classes];
        for (out, y) in outputs.iter().zip(targets) {
            if !out.same_shape(y) {
                return Err(Error::shape(out.shape(), y.shape()));
            }
            matrix[class_of(y)][class_of(out)] += 1;
        }
        log::debug!("confusion matrix over {} examples: {matrix:?}", inputs.len());
        Ok(matrix)
    }

    fn predictions(&self, inputs: &[Tensor], targets: &[Tensor]) -> Result<Vec<Tensor>> {
        check_dataset(inputs, targets)?;
        self.forward_all(inputs)
    }
}
