//! Plain and momentum gradient descent.

use super::{Optimizer, Slots, check_lr, check_rate};
use crate::error::Result;
use crate::layers::Trainable;

/// Performs plain gradient descent: `p -= lr * g`.
///
/// Stateless, so `update` works without `initialize`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    lr: f64,
    slots: Slots,
}

impl GradientDescent {
    /// Creates the rule.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        check_lr("GradientDescent", lr)?;
        Ok(Self {
            lr,
            slots: Slots::new(0),
        })
    }

    /// The learning rate.
    #[must_use]
    pub fn lr(&self) -> f64 {
        self.lr
    }
}

impl Optimizer for GradientDescent {
    fn name(&self) -> &'static str {
        "GradientDescent"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let lr = self.lr;
        self.slots.apply("GradientDescent", layers, |p, g, _| p - lr * g)
    }
}

/// Gradient descent with (optionally Nesterov) momentum.
///
/// ```text
/// v = μ·v + g
/// d = nesterov ? g + μ·v : v
/// p -= lr·d
/// ```
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    nesterov: bool,
    slots: Slots,
}

impl Sgd {
    /// Creates the rule with momentum `0.9` and no Nesterov correction.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        check_lr("Sgd", lr)?;
        Ok(Self {
            lr,
            momentum: 0.9,
            nesterov: false,
            slots: Slots::new(1),
        })
    }

    /// Sets the momentum coefficient.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `momentum` is in `[0, 1)`.
    pub fn with_momentum(mut self, momentum: f64) -> Result<Self> {
        check_rate("Sgd", "momentum", momentum)?;
        self.momentum = momentum;
        Ok(self)
    }

    /// Enables the Nesterov look-ahead.
    #[must_use]
    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "Sgd"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let (lr, mu, nesterov) = (self.lr, self.momentum, self.nesterov);
        self.slots.apply("Sgd", layers, |p, g, m| {
            let v = mu * m[0] + g;
            m[0] = v;
            let d = if nesterov { g + mu * v } else { v };
            p - lr * d
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::testing::run;

    #[test]
    fn zero_gradient_is_a_no_op() {
        let mut gd = GradientDescent::new(0.5).unwrap();
        assert_eq!(run(&mut gd, [0.0, 0.0], 5), vec![1.0, 2.0]);
    }

    #[test]
    fn plain_step() {
        let mut gd = GradientDescent::new(0.5).unwrap();
        assert_eq!(run(&mut gd, [1.0, -2.0], 1), vec![0.5, 3.0]);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut sgd = Sgd::new(0.1).unwrap().with_momentum(0.5).unwrap();
        // v1 = 1, v2 = 1.5: p = 1 - 0.1 - 0.15
        let k = run(&mut sgd, [1.0, 0.0], 2);
        assert!((k[0] - 0.75).abs() < 1e-12);
        assert_eq!(k[1], 2.0);
    }

    #[test]
    fn nesterov_looks_ahead() {
        let mut sgd = Sgd::new(0.1)
            .unwrap()
            .with_momentum(0.5)
            .unwrap()
            .with_nesterov(true);
        // v = 1, d = 1 + 0.5
        let k = run(&mut sgd, [1.0, 0.0], 1);
        assert!((k[0] - 0.85).abs() < 1e-12);
    }
}
