//! Lion.

use super::{Optimizer, Slots, check_lr, check_rate};
use crate::error::{Error, Result};
use crate::layers::Trainable;

/// Sign-based momentum with decoupled weight decay.
///
/// ```text
/// c = β1·m + (1 - β1)·g
/// p -= lr·(sign(c) + λ·p)
/// m = β2·m + (1 - β2)·g
/// ```
///
/// `sign(0)` is `0`, so a zero interpolation leaves the parameter to weight
/// decay alone.
#[derive(Debug, Clone)]
pub struct Lion {
    lr: f64,
    beta1: f64,
    beta2: f64,
    weight_decay: f64,
    slots: Slots,
}

#[inline]
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Lion {
    /// Creates the rule with `beta1 = 0.9`, `beta2 = 0.99` and no weight
    /// decay.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        check_lr("Lion", lr)?;
        Ok(Self {
            lr,
            beta1: 0.9,
            beta2: 0.99,
            weight_decay: 0.0,
            slots: Slots::new(1),
        })
    }

    /// Sets the interpolation and momentum decay rates.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless both are in `[0, 1)`.
    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Result<Self> {
        check_rate("Lion", "beta1", beta1)?;
        check_rate("Lion", "beta2", beta2)?;
        self.beta1 = beta1;
        self.beta2 = beta2;
        Ok(self)
    }

    /// Sets the decoupled weight decay `λ`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] on a negative or non-finite value.
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Result<Self> {
        if !(weight_decay >= 0.0 && weight_decay.is_finite()) {
            return Err(Error::config(format!(
                "Lion weight decay must be non-negative, got {weight_decay}"
            )));
        }
        self.weight_decay = weight_decay;
        Ok(self)
    }
}

impl Optimizer for Lion {
    fn name(&self) -> &'static str {
        "Lion"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let (lr, beta1, beta2, wd) = (self.lr, self.beta1, self.beta2, self.weight_decay);
        self.slots.apply("Lion", layers, |p, g, m| {
            let c = beta1 * m[0] + (1.0 - beta1) * g;
            m[0] = beta2 * m[0] + (1.0 - beta2) * g;
            p - lr * (sign(c) + wd * p)
        })
    }
}
