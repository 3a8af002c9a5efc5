//! AMSGrad.

use super::adam::{AdamConfig, adam_setters};
use super::{Optimizer, Slots, correction};
use crate::error::Result;
use crate::layers::Trainable;

/// Adam whose second-moment estimate never decreases.
///
/// ```text
/// m, v as in Adam
/// vmax = max(vmax, v)
/// v̂ = vmax / (1 - β2ᵗ)
/// p -= lr·m̂ / (√v̂ + eps)
/// ```
#[derive(Debug, Clone)]
pub struct AmsGrad {
    config: AdamConfig,
    t: u64,
    slots: Slots,
}

impl AmsGrad {
    /// Creates the rule with `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        Ok(Self {
            config: AdamConfig::new("AmsGrad", lr)?,
            t: 0,
            slots: Slots::new(3),
        })
    }
}

adam_setters!(AmsGrad, "AmsGrad");

impl Optimizer for AmsGrad {
    fn name(&self) -> &'static str {
        "AmsGrad"
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
        self.slots.apply("AmsGrad", layers, |p, g, m| {
            let [m1, m2, vmax] = m else { return p };
            *m1 = beta1 * *m1 + (1.0 - beta1) * g;
            *m2 = beta2 * *m2 + (1.0 - beta2) * g * g;
            *vmax = vmax.max(*m2);
            let m_hat = *m1 / c1;
            let v_hat = *vmax / c2;
            p - lr * m_hat / (v_hat.sqrt() + eps)
        })?;
        self.t = t;
        Ok(())
    }
}
