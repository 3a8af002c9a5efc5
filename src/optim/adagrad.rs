//! AdaGrad.

use super::{Optimizer, Slots, check_eps, check_lr};
use crate::error::Result;
use crate::layers::Trainable;

/// Adaptive per-scalar learning rates from the running sum of squared
/// gradients.
///
/// ```text
/// h += g²
/// p -= lr·g / (√h + eps)
/// ```
#[derive(Debug, Clone)]
pub struct AdaGrad {
    lr: f64,
    eps: f64,
    slots: Slots,
}

impl AdaGrad {
    /// Creates the rule with `eps = 1e-8`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        check_lr("AdaGrad", lr)?;
        Ok(Self {
            lr,
            eps: 1e-8,
            slots: Slots::new(1),
        })
    }

    /// Sets epsilon.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `eps > 0`.
    pub fn with_eps(mut self, eps: f64) -> Result<Self> {
        check_eps("AdaGrad", eps)?;
        self.eps = eps;
        Ok(self)
    }
}

impl Optimizer for AdaGrad {
    fn name(&self) -> &'static str {
        "AdaGrad"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let (lr, eps) = (self.lr, self.eps);
        self.slots.apply("AdaGrad", layers, |p, g, m| {
            m[0] += g * g;
            p - lr * g / (m[0].sqrt() + eps)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::testing::run;

    #[test]
    fn steps_shrink_as_squares_accumulate() {
        let mut ada = AdaGrad::new(1.0).unwrap();
        let one = run(&mut ada, [2.0, 0.0], 1);
        assert!((one[0] - 0.0).abs() < 1e-6);

        // second step: 2 / sqrt(8)
        let mut ada = AdaGrad::new(1.0).unwrap();
        let two = run(&mut ada, [2.0, 0.0], 2);
        assert!((two[0] - (0.0 - 2.0 / 8f64.sqrt())).abs() < 1e-6);
    }
}
