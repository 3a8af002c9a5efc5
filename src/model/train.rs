#![allow(clippy::cast_precision_loss)]
//! The training loop.

use super::{Sample, Sequential, TrainConfig, backward_layers, forward_layers, trainables_mut};
use crate::error::{Error, Result};
use crate::layers::Layer;
use crate::loss::Loss;
use crate::tensors::Tensor;

pub(super) fn check_dataset(inputs: &[Tensor], targets: &[Tensor]) -> Result<()> {
    if inputs.len() != targets.len() {
        return Err(Error::config(format!(
            "{} inputs but {} targets",
            inputs.len(),
            targets.len()
        )));
    }
    if inputs.is_empty() {
        return Err(Error::config("dataset is empty"));
    }
    Ok(())
}

impl Sequential {
    /// Trains the model for `epochs` passes over the dataset.
    ///
    /// The dataset is cut into contiguous batches of `batch_size` examples
    /// (the last one may be shorter). Every example of a batch is run
    /// forward and backward, accumulating gradients; then the optimizer
    /// updates every trainable layer in ascending id order and the
    /// gradients are cleared.
    ///
    /// With history enabled (see [`TrainConfig::history`]) the mean loss
    /// over the whole dataset is recorded after each epoch.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] on mismatched or empty datasets, zero
    ///   epochs or a zero batch size
    /// - [`Error::NotBuilt`] before compilation
    /// - any error from a layer, the loss or the optimizer, which aborts
    ///   training immediately
    pub fn train(
        &mut self,
        inputs: &[Tensor],
        targets: &[Tensor],
        epochs: usize,
        batch_size: usize,
    ) -> Result<()> {
        check_dataset(inputs, targets)?;
        if epochs == 0 {
            return Err(Error::config("epochs must be at least 1, got 0"));
        }
        if batch_size == 0 {
            return Err(Error::config("batch size must be at least 1, got 0"));
        }
        if !self.is_compiled() {
            return Err(Error::not_built("model"));
        }

        self.history.clear();
        set_training(&mut self.layers, true);
        let result = self.run_epochs(inputs, targets, epochs, batch_size);
        set_training(&mut self.layers, false);
        result
    }

    fn run_epochs(
        &mut self,
        inputs: &[Tensor],
        targets: &[Tensor],
        epochs: usize,
        batch_size: usize,
    ) -> Result<()> {
        let Self {
            layers,
            optimizer,
            loss,
            config,
            history,
            loss_grad,
        } = self;
        let optimizer = optimizer.as_mut().ok_or_else(|| Error::not_built("model"))?;
        let loss_grad = loss_grad.as_mut().ok_or_else(|| Error::not_built("model"))?;
        let loss = *loss;

        for t in trainables_mut(layers) {
            t.zero_grad()?;
        }

        for epoch in 0..epochs {
            for (batch, (xs, ys)) in inputs
                .chunks(batch_size)
                .zip(targets.chunks(batch_size))
                .enumerate()
            {
                for (x, y) in xs.iter().zip(ys) {
                    let out = forward_layers(layers, x)?;
                    loss.gradient_into(out, y, loss_grad)?;
                    backward_layers(layers, loss_grad)?;
                }
                optimizer.update(&mut trainables_mut(layers))?;
                for t in trainables_mut(layers) {
                    t.zero_grad()?;
                }
                log::trace!("epoch {epoch} batch {batch}: {} examples", xs.len());
            }

            if config.history {
                let mean = mean_loss(layers, loss, inputs, targets)?;
                log::info!("epoch {}/{epochs}: loss {mean:.6}", epoch + 1);
                history.push(mean);
            }
        }
        Ok(())
    }

    /// Applies `config` and trains with its epochs and batch size.
    ///
    /// Parameters are drawn once, by [`Sequential::compile`], so a seed in
    /// `config` has no effect on an already compiled model; fix the seed
    /// with [`Sequential::configure`] before compiling instead.
    ///
    /// # Errors
    ///
    /// As [`TrainConfig::validate`] and [`Sequential::train`].
    pub fn fit(&mut self, inputs: &[Tensor], targets: &[Tensor], config: &TrainConfig) -> Result<()> {
        if self.is_compiled() && config.seed.is_some() && config.seed != self.config.seed {
            log::warn!(
                "seed {:?} ignored: parameters were initialized at compile time",
                config.seed
            );
        }
        self.configure(config.clone())?;
        self.train(inputs, targets, config.epochs, config.batch_size)
    }

    /// Resolves every sample against the model's input and output shapes,
    /// then trains as [`Sequential::train`].
    ///
    /// # Errors
    ///
    /// As [`Sample::resolve`] and [`Sequential::train`].
    pub fn train_samples(
        &mut self,
        inputs: Vec<Sample>,
        targets: Vec<Sample>,
        epochs: usize,
        batch_size: usize,
    ) -> Result<()> {
        let input_shape = self.input_shape()?.to_vec();
        let output_shape = self.output_shape()?.to_vec();
        let inputs = inputs
            .into_iter()
            .map(|s| s.resolve(&input_shape))
            .collect::<Result<Vec<_>>>()?;
        let targets = targets
            .into_iter()
            .map(|s| s.resolve(&output_shape))
            .collect::<Result<Vec<_>>>()?;
        self.train(&inputs, &targets, epochs, batch_size)
    }

    /// Mean loss over a dataset, computed with parallel inference.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] on mismatched or empty datasets
    /// - any error from [`Sequential::forward_all`] or the loss
    pub fn evaluate(&self, inputs: &[Tensor], targets: &[Tensor]) -> Result<f64> {
        self.evaluate_with(self.loss, inputs, targets)
    }
}

fn set_training(layers: &mut [Box<dyn Layer>], training: bool) {
    for layer in layers {
        layer.set_training(training);
    }
}

fn mean_loss(
    layers: &mut [Box<dyn Layer>],
    loss: Loss,
    inputs: &[Tensor],
    targets: &[Tensor],
) -> Result<f64> {
    let mut total = 0.0;
    for (x, y) in inputs.iter().zip(targets) {
        total += loss.value(forward_layers(layers, x)?, y)?;
    }
    Ok(total / inputs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::layers::Dense;
    use crate::optim::GradientDescent;
    use crate::tensor;

    fn line_model() -> Sequential {
        let mut m = Sequential::new();
        m.add(Dense::new(1, Activation::Linear).unwrap());
        m.compile(
            &[1],
            Box::new(GradientDescent::new(0.1).unwrap()),
            Loss::MeanSquaredError,
        )
        .unwrap();
        m.layers[0]
            .as_trainable_mut()
            .unwrap()
            .load_kernel(&[0.0])
            .unwrap();
        m
    }

    #[test]
    fn rejects_bad_arguments() {
        let mut m = line_model();
        let x = vec![tensor!([1.0])];
        let y = vec![tensor!([2.0])];
        assert!(matches!(m.train(&x, &[], 1, 1), Err(Error::Configuration(_))));
        assert!(matches!(m.train(&[], &[], 1, 1), Err(Error::Configuration(_))));
        assert!(matches!(m.train(&x, &y, 0, 1), Err(Error::Configuration(_))));
        assert!(matches!(m.train(&x, &y, 1, 0), Err(Error::Configuration(_))));
    }

    #[test]
    fn one_update_per_batch() {
        // y = 2x through the origin; kernel starts at 0, bias at 0
        let mut m = line_model();
        let x = vec![tensor!([1.0]), tensor!([1.0])];
        let y = vec![tensor!([2.0]), tensor!([2.0])];
        m.train(&x, &y, 1, 2).unwrap();
        // dL/dw = 2·(0 - 2)·1 per example, summed over the batch
        assert!((m.kernel_of(0).unwrap().get_flat(0) - 0.8).abs() < 1e-12);
        assert!(!m.layer(0).unwrap().is_training());
    }

    #[test]
    fn history_has_one_entry_per_epoch() {
        let mut m = line_model();
        m.set_history(true);
        let x = vec![tensor!([1.0]), tensor!([2.0])];
        let y = vec![tensor!([2.0]), tensor!([4.0])];
        m.train(&x, &y, 5, 1).unwrap();
        assert_eq!(m.history().len(), 5);
        assert!(m.history()[4] < m.history()[0]);

        m.set_history(false);
        m.train(&x, &y, 2, 1).unwrap();
        assert!(m.history().is_empty());
    }

    #[test]
    fn samples_resolve_before_training() {
        let mut m = line_model();
        let xs = vec![Sample::from(vec![1.0])];
        let ys = vec![Sample::from(tensor!([2.0]))];
        m.train_samples(xs, ys, 1, 1).unwrap();

        let bad = vec![Sample::from(vec![1.0, 2.0])];
        assert!(matches!(
            m.train_samples(bad, vec![Sample::from(vec![0.0])], 1, 1),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn fit_seed_does_not_reinitialize() {
        let run = |seed| {
            let mut m = Sequential::new();
            m.configure(TrainConfig::default().with_seed(3)).unwrap();
            m.add(Dense::new(2, Activation::Tanh).unwrap());
            m.compile(
                &[2],
                Box::new(GradientDescent::new(0.1).unwrap()),
                Loss::MeanSquaredError,
            )
            .unwrap();
            let config = TrainConfig::default().with_epochs(2).with_seed(seed);
            m.fit(&[tensor!([1.0, 0.5])], &[tensor!([0.0, 1.0])], &config).unwrap();
            m.kernel_of(0).unwrap().to_vec()
        };
        assert_eq!(run(3), run(99));
    }

    #[test]
    fn evaluate_matches_the_loss() {
        let m = line_model();
        let loss = m.evaluate(&[tensor!([1.0])], &[tensor!([3.0])]).unwrap();
        assert!((loss - 9.0).abs() < 1e-12);
    }
}
