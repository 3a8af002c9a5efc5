//! Adadelta.

use super::{Optimizer, Slots, check_eps, check_lr, check_rate};
use crate::error::Result;
use crate::layers::Trainable;

/// Adadelta: step sizes from the ratio of two decaying averages.
///
/// ```text
/// Eg = ρ·Eg + (1 - ρ)·g²
/// Δ  = √(Ex + eps) / √(Eg + eps) · g
/// Ex = ρ·Ex + (1 - ρ)·Δ²
/// p -= lr·Δ
/// ```
#[derive(Debug, Clone)]
pub struct Adadelta {
    lr: f64,
    rho: f64,
    eps: f64,
    slots: Slots,
}

impl Adadelta {
    /// Creates the rule with `rho = 0.95`, `eps = 1e-6`. The usual learning
    /// rate is `1.0`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        check_lr("Adadelta", lr)?;
        Ok(Self {
            lr,
            rho: 0.95,
            eps: 1e-6,
            slots: Slots::new(2),
        })
    }

    /// Sets the decay rate.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `rho` is in `[0, 1)`.
    pub fn with_rho(mut self, rho: f64) -> Result<Self> {
        check_rate("Adadelta", "rho", rho)?;
        self.rho = rho;
        Ok(self)
    }

    /// Sets epsilon.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `eps > 0`.
    pub fn with_eps(mut self, eps: f64) -> Result<Self> {
        check_eps("Adadelta", eps)?;
        self.eps = eps;
        Ok(self)
    }
}

impl Optimizer for Adadelta {
    fn name(&self) -> &'static str {
        "Adadelta"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let (lr, rho, eps) = (self.lr, self.rho, self.eps);
        self.slots.apply("Adadelta", layers, |p, g, m| {
            let [eg, ex] = m else { return p };
            *eg = rho * *eg + (1.0 - rho) * g * g;
            let delta = (*ex + eps).sqrt() / (*eg + eps).sqrt() * g;
            *ex = rho * *ex + (1.0 - rho) * delta * delta;
            p - lr * delta
        })
    }
}
