//! Nadam.

use super::adam::{AdamConfig, adam_setters};
use super::{Optimizer, Slots, correction};
use crate::error::Result;
use crate::layers::Trainable;

/// Adam with a Nesterov look-ahead on the first moment.
///
/// ```text
/// m, v, m̂, v̂ as in Adam
/// m̄ = β1·m̂ + (1 - β1)·g / (1 - β1ᵗ)
/// p -= lr·m̄ / (√v̂ + eps)
/// ```
#[derive(Debug, Clone)]
pub struct Nadam {
    config: AdamConfig,
    t: u64,
    slots: Slots,
}

impl Nadam {
    /// Creates the rule with `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        Ok(Self {
            config: AdamConfig::new("Nadam", lr)?,
            t: 0,
            slots: Slots::new(2),
        })
    }
}

adam_setters!(Nadam, "Nadam");

impl Optimizer for Nadam {
    fn name(&self) -> &'static str {
        "Nadam"
    }

    fn duplicate(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn initialize(&mut self, layers: &[&dyn Trainable]) -> Result<()> {
        self.t = 0;
        self.slots.initialize(self.name(), layers)
    }

    fn update(&mut self, layers: &mut [&mut dyn Trainable]) -> Result<()> {
        let AdamConfig {
            lr,
            beta1,
            beta2,
            eps,
        } = self.config;
        let t = self.t + 1;
        let (c1, c2) = (correction(beta1, t), correction(beta2, t));
        self.slots.apply("Nadam", layers, |p, g, m| {
            let [m1, m2] = m else { return p };
            *m1 = beta1 * *m1 + (1.0 - beta1) * g;
            *m2 = beta2 * *m2 + (1.0 - beta2) * g * g;
            let m_hat = *m1 / c1;
            let v_hat = *m2 / c2;
            let m_bar = beta1 * m_hat + (1.0 - beta1) * g / c1;
            p - lr * m_bar / (v_hat.sqrt() + eps)
        })?;
        self.t = t;
        Ok(())
    }
}
