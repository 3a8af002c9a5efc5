//! Parallel read-only inference.
//!
//! Each worker runs a fork of the model: the forked layers alias the
//! original parameters and own private activation buffers, so workers never
//! write to shared cells. Inputs are split into contiguous chunks, one per
//! worker, and every result lands at the index of its input.

use super::{Sequential, forward_layers};
use crate::error::{Error, Result};
use crate::layers::Layer;
use crate::tensors::Tensor;
use rayon::prelude::*;
use std::mem;
use std::num::NonZeroUsize;
use std::thread;

fn available_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Cuts `outputs` and `inputs` into `workers` contiguous runs of
/// `len / workers` items; the last run also takes the remainder.
fn split_work<'a, 'b>(
    mut outputs: &'a mut [Tensor],
    mut inputs: &'b [Tensor],
    workers: usize,
) -> Vec<(&'a mut [Tensor], &'b [Tensor])> {
    let share = inputs.len() / workers;
    let mut jobs = Vec::with_capacity(workers);
    for _ in 1..workers {
        let (outs, rest_outs) = mem::take(&mut outputs).split_at_mut(share);
        let (xs, rest_xs) = inputs.split_at(share);
        jobs.push((outs, xs));
        outputs = rest_outs;
        inputs = rest_xs;
    }
    jobs.push((outputs, inputs));
    jobs
}

impl Sequential {
    /// Runs every input through the model in parallel.
    ///
    /// Uses [`TrainConfig::workers`](super::TrainConfig::workers) workers,
    /// or one per available core when unset.
    ///
    /// # Errors
    ///
    /// As [`Sequential::forward_all_with`].
    pub fn forward_all(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let workers = self.config.workers.unwrap_or_else(available_workers);
        self.forward_all_with(inputs, workers)
    }

    /// Runs every input through the model on at most `workers` threads.
    ///
    /// The worker count is clamped to the number of inputs, so exactly
    /// `min(workers, inputs.len())` workers start. The model itself is not
    /// touched; results equal those of sequential [`Sequential::forward`]
    /// calls.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `workers` is zero or the pool cannot
    ///   start
    /// - [`Error::NotBuilt`] before compilation
    /// - the first error any worker hits; no partial results are returned
    pub fn forward_all_with(&self, inputs: &[Tensor], workers: usize) -> Result<Vec<Tensor>> {
        if workers == 0 {
            return Err(Error::config("worker count must be at least 1, got 0"));
        }
        self.ensure_built()?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let workers = workers.min(inputs.len());
        let share = inputs.len() / workers;
        let output_shape = self.output_shape()?;
        let mut outputs = inputs
            .iter()
            .map(|_| Tensor::zeros(output_shape))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "forwarding {} inputs on {workers} workers ({share} per worker, {} extra on the last)",
            inputs.len(),
            inputs.len() % workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::config(format!("cannot start {workers} inference workers: {e}")))?;

        let jobs = split_work(&mut outputs, inputs, workers);
        let layers = &self.layers;
        pool.install(|| {
            jobs.into_par_iter()
                .try_for_each(|(outs, xs)| -> Result<()> {
                    let mut fork: Vec<Box<dyn Layer>> = layers.iter().map(|l| l.fork()).collect();
                    for (out, x) in outs.iter_mut().zip(xs) {
                        out.copy_from(forward_layers(&mut fork, x)?)?;
                    }
                    Ok(())
                })
        })?;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::layers::Dense;
    use crate::loss::Loss;
    use crate::model::TrainConfig;
    use crate::optim::GradientDescent;
    use crate::tensor;

    fn model() -> Sequential {
        let mut m = Sequential::new();
        m.configure(TrainConfig::default().with_seed(5)).unwrap();
        m.add(Dense::new(3, Activation::Tanh).unwrap());
        m.add(Dense::new(2, Activation::Sigmoid).unwrap());
        m.compile(
            &[2],
            Box::new(GradientDescent::new(0.1).unwrap()),
            Loss::MeanSquaredError,
        )
        .unwrap();
        m
    }

    #[test]
    fn every_worker_gets_a_share() {
        let xs: Vec<Tensor> = (0..4u8).map(|i| Tensor::filled(&[1], f64::from(i)).unwrap()).collect();
        let mut ys: Vec<Tensor> = (0..4).map(|_| Tensor::zeros(&[1]).unwrap()).collect();
        let jobs = split_work(&mut ys, &xs, 3);
        let sizes: Vec<(usize, usize)> = jobs.iter().map(|(o, x)| (o.len(), x.len())).collect();
        assert_eq!(sizes, vec![(1, 1), (1, 1), (2, 2)]);
        assert_eq!(jobs[2].1[0].item().unwrap(), 2.0);

        let mut ys: Vec<Tensor> = (0..4).map(|_| Tensor::zeros(&[1]).unwrap()).collect();
        assert_eq!(split_work(&mut ys, &xs, 4).len(), 4);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let m = model();
        assert!(matches!(
            m.forward_all_with(&[tensor!([0.0, 0.0])], 0),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn more_workers_than_inputs_is_clamped() {
        let mut m = model();
        let xs = vec![tensor!([0.5, -1.0]), tensor!([2.0, 0.0])];
        let par = m.forward_all_with(&xs, 16).unwrap();
        for (x, y) in xs.iter().zip(&par) {
            assert_eq!(m.forward(x).unwrap(), y);
        }
    }

    #[test]
    fn leaves_the_model_buffers_alone() {
        let mut m = model();
        m.forward(&tensor!([1.0, 1.0])).unwrap();
        let before = m.output_array().unwrap();
        m.forward_all_with(&vec![tensor!([-3.0, 4.0]); 4], 2).unwrap();
        assert_eq!(m.output_array().unwrap(), before);
    }

    #[test]
    fn a_failing_input_fails_the_batch() {
        let m = model();
        let xs = vec![tensor!([1.0, 1.0]), tensor!([1.0, 1.0, 1.0])];
        assert!(matches!(
            m.forward_all_with(&xs, 2),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
