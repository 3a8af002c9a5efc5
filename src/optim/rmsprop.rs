//! RMSProp.

use super::{Optimizer, Slots, check_eps, check_lr, check_rate};
use crate::error::Result;
use crate::layers::Trainable;

/// Scales steps by a decaying average of squared gradients.
///
/// ```text
/// v = ρ·v + (1 - ρ)·g²
/// p -= lr·g / (√v + eps)
/// ```
#[derive(Debug, Clone)]
pub struct RmsProp {
    lr: f64,
    rho: f64,
    eps: f64,
    slots: Slots,
}

impl RmsProp {
    /// Creates the rule with `rho = 0.9`, `eps = 1e-8`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        check_lr("RmsProp", lr)?;
        Ok(Self {
            lr,
            rho: 0.9,
            eps: 1e-8,
            slots: Slots::new(1),
        })
    }

    /// Sets the decay rate.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `rho` is in `[0, 1)`.
    pub fn with_rho(mut self, rho: f64) -> Result<Self> {
        check_rate("RmsProp", "rho", rho)?;
        self.rho = rho;
        Ok(self)
    }

    /// Sets epsilon.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `eps > 0`.
    pub fn with_eps(mut self, eps: f64) -> Result<Self> {
        check_eps("RmsProp", eps)?;
        self.eps = eps;
        Ok(self)
    }
}

impl Optimizer for RmsProp {
    fn name(&self) -> &'static str {
        "RmsProp"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let (lr, rho, eps) = (self.lr, self.rho, self.eps);
        self.slots.apply("RmsProp", layers, |p, g, m| {
            m[0] = rho * m[0] + (1.0 - rho) * g * g;
            p - lr * g / (m[0].sqrt() + eps)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::testing::run;

    #[test]
    fn first_step_matches_formula() {
        let mut rms = RmsProp::new(0.01).unwrap().with_rho(0.5).unwrap();
        // v = 0.5 * 4 = 2
        let k = run(&mut rms, [2.0, 0.0], 1);
        let expected = 1.0 - 0.01 * 2.0 / (2f64.sqrt() + 1e-8);
        assert!((k[0] - expected).abs() < 1e-12);
    }
}
