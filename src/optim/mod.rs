//! Optimizers.
//!
//! An [`Optimizer`] turns the gradients accumulated in trainable layers into
//! parameter updates. The model hands it every trainable layer in ascending
//! id order, both when initializing and when updating, and each parameter
//! tensor (kernel first, then bias) receives exactly one application of the
//! rule per [`Optimizer::update`]. Optimizers never clear gradients; that is
//! the model's job.
//!
//! Stateful rules allocate one auxiliary tensor per tracked moment per
//! parameter tensor in [`Optimizer::initialize`] and never reallocate
//! afterwards.
//!
//! | Rule | Moments |
//! |------|---------|
//! | [`GradientDescent`] | none |
//! | [`Sgd`] | velocity |
//! | [`AdaGrad`] | squared-gradient sum |
//! | [`RmsProp`] | squared-gradient average |
//! | [`Adadelta`] | squared-gradient and squared-update averages |
//! | [`Adam`], [`Nadam`] | first and second moments |
//! | [`AmsGrad`] | first, second and max second moments |
//! | [`Lion`] | momentum |

mod adadelta;
pub use self::adadelta::Adadelta;

mod adagrad;
pub use self::adagrad::AdaGrad;

mod adam;
pub use self::adam::Adam;

mod amsgrad;
pub use self::amsgrad::AmsGrad;

mod lion;
pub use self::lion::Lion;

mod nadam;
pub use self::nadam::Nadam;

mod rmsprop;
pub use self::rmsprop::RmsProp;

mod sgd;
pub use self::sgd::{GradientDescent, Sgd};

use crate::error::{Error, Result};
use crate::layers::Trainable;
use crate::tensors::Tensor;
use std::fmt;

/// Optimizer trait abstraction.
pub trait Optimizer: Send + fmt::Debug {
    /// Short name of the rule, e.g. `"Adam"`.
    fn name(&self) -> &'static str;

    /// A deep copy, moment state included.
    fn duplicate(&self) -> Box<dyn Optimizer>;

    /// Allocates per-parameter state for `layers`.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] if a layer has not been built.
    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()>;

    /// Applies one step of the rule to every parameter of `layers`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotBuilt`] if a stateful rule was never initialized
    /// - [`Error::ShapeMismatch`] if the parameters no longer match the ones
    ///   seen by [`Optimizer::initialize`]
    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()>;
}

/// Largest number of moments any rule tracks.
const MAX_MOMENTS: usize = 3;

/// Per-parameter moment tensors shared by every rule.
#[derive(Debug, Clone)]
pub(crate) struct Slots {
    per_param: usize,
    moments: Option<Vec<Vec<Tensor>>>,
}

impl Slots {
    pub(crate) const fn new(per_param: usize) -> Self {
        Self {
            per_param,
            moments: None,
        }
    }

    pub(crate) fn initialize(&mut self, name: &str, layers: &[&dyn Trainable]) -> Result<()> {
        let mut moments = Vec::new();
        for layer in layers {
            for p in layer.parameters()? {
                let tracked = (0..self.per_param)
                    .map(|_| Tensor::zeros(p.shape()))
                    .collect::<Result<Vec<_>>>()?;
                moments.push(tracked);
            }
        }
        log::debug!(
            "initialized {name} for {} parameter tensors ({} moments each)",
            moments.len(),
            self.per_param
        );
        self.moments = Some(moments);
        Ok(())
    }

    /// Runs `rule(param, grad, moments)` on every scalar of every parameter
    /// and stores the returned parameter. `moments` holds this scalar's
    /// moment values and is written back afterwards.
    pub(crate) fn apply(
        &mut self,
        name: &str,
        layers: &mut [&mut dyn Trainable],
        mut rule: impl FnMut(f64, f64, &mut [f64]) -> f64,
    ) -> Result<()> {
        let mut params = Vec::new();
        for layer in layers.iter_mut() {
            params.extend(layer.parameters_mut()?);
        }

        if self.per_param == 0 {
            for p in &mut params {
                for i in 0..p.value.len() {
                    let v = rule(p.value.get_flat(i), p.grad.get_flat(i), &mut []);
                    p.value.set_flat(i, v);
                }
            }
            return Ok(());
        }

        let moments = self
            .moments
            .as_mut()
            .ok_or_else(|| Error::not_built(format!("{name} optimizer state")))?;
        if moments.len() != params.len() {
            return Err(Error::shape(&[moments.len()], &[params.len()]));
        }
        for (p, m) in params.iter().zip(moments.iter()) {
            if m[0].shape() != p.value.shape() {
                return Err(Error::shape(m[0].shape(), p.value.shape()));
            }
        }

        let k = self.per_param;
        let mut buf = [0.0; MAX_MOMENTS];
        for (p, m) in params.iter_mut().zip(moments.iter_mut()) {
            for i in 0..p.value.len() {
                for (slot, t) in buf.iter_mut().zip(m.iter()) {
                    *slot = t.get_flat(i);
                }
                let v = rule(p.value.get_flat(i), p.grad.get_flat(i), &mut buf[..k]);
                p.value.set_flat(i, v);
                for (slot, t) in buf.iter().zip(m.iter_mut()) {
                    t.set_flat(i, *slot);
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn check_lr(name: &str, lr: f64) -> Result<()> {
    if lr > 0.0 && lr.is_finite() {
        Ok(())
    } else {
        Err(Error::config(format!("{name} learning rate must be positive, got {lr}")))
    }
}

/// Decay rates live in `[0, 1)`.
pub(crate) fn check_rate(name: &str, what: &str, value: f64) -> Result<()> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::config(format!("{name} {what} must be in [0, 1), got {value}")))
    }
}

pub(crate) fn check_eps(name: &str, eps: f64) -> Result<()> {
    if eps > 0.0 && eps.is_finite() {
        Ok(())
    } else {
        Err(Error::config(format!("{name} epsilon must be positive, got {eps}")))
    }
}

/// `1 - beta^t` for bias correction.
#[inline]
pub(crate) fn correction(beta: f64, t: u64) -> f64 {
    1.0 - beta.powi(i32::try_from(t).unwrap_or(i32::MAX))
}


#[cfg(test)]
mod tests {
    use super::testing::{layer, run};
    use super::*;

    #[test]
    fn stateful_rule_needs_initialize() {
        let mut adam = Adam::new(0.1).unwrap();
        let mut d = layer([1.0, 1.0]);
        assert!(matches!(adam.update(&mut [&mut d]), Err(Error::NotBuilt { .. })));
    }

    #[test]
    fn parameter_drift_is_a_shape_mismatch() {
        let mut adam = Adam::new(0.1).unwrap();
        let a = layer([1.0, 1.0]);
        let mut b = layer([1.0, 1.0]);
        adam.initialize(&[&a]).unwrap();
        assert!(matches!(
            adam.update(&mut [&mut b, &mut layer([0.0, 0.0])]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn update_leaves_gradients_alone() {
        let mut d = layer([0.5, -0.5]);
        let mut sgd = GradientDescent::new(0.1).unwrap();
        sgd.update(&mut [&mut d]).unwrap();
        assert_eq!(d.grad_kernel().unwrap().to_vec(), vec![0.5, -0.5]);
    }

    #[test]
    fn every_rule_descends_on_a_positive_gradient() {
        let rules: Vec<Box<dyn Optimizer>> = vec![
            Box::new(GradientDescent::new(0.1).unwrap()),
            Box::new(Sgd::new(0.1).unwrap().with_momentum(0.9).unwrap()),
            Box::new(AdaGrad::new(0.1).unwrap()),
            Box::new(RmsProp::new(0.1).unwrap()),
            Box::new(Adadelta::new(1.0).unwrap()),
            Box::new(Adam::new(0.1).unwrap()),
            Box::new(Nadam::new(0.1).unwrap()),
            Box::new(AmsGrad::new(0.1).unwrap()),
            Box::new(Lion::new(0.1).unwrap()),
        ];
        for mut rule in rules {
            let k = run(rule.as_mut(), [1.0, 1.0], 3);
            assert!(k[0] < 1.0 && k[1] < 2.0, "{} moved {k:?}", rule.name());
        }
    }

    #[test]
    fn hyperparameters_are_validated() {
        assert!(matches!(GradientDescent::new(0.0), Err(Error::Configuration(_))));
        assert!(Adam::new(0.1).unwrap().with_betas(1.0, 0.999).is_err());
        assert!(RmsProp::new(0.1).unwrap().with_eps(0.0).is_err());
        assert!(Sgd::new(-1.0).is_err());
    }
}
