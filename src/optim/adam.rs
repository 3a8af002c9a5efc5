//! Adam and the hyperparameters shared by its variants.

use super::{Optimizer, Slots, check_eps, check_lr, check_rate, correction};
use crate::error::Result;
use crate::layers::Trainable;

/// Learning rate, moment decay rates and epsilon of the Adam family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdamConfig {
    pub(crate) lr: f64,
    pub(crate) beta1: f64,
    pub(crate) beta2: f64,
    pub(crate) eps: f64,
}

impl AdamConfig {
    /// `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    pub(crate) fn new(name: &str, lr: f64) -> Result<Self> {
        check_lr(name, lr)?;
        Ok(Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        })
    }

    pub(crate) fn betas(mut self, name: &str, beta1: f64, beta2: f64) -> Result<Self> {
        check_rate(name, "beta1", beta1)?;
        check_rate(name, "beta2", beta2)?;
        self.beta1 = beta1;
        self.beta2 = beta2;
        Ok(self)
    }

    pub(crate) fn eps(mut self, name: &str, eps: f64) -> Result<Self> {
        check_eps(name, eps)?;
        self.eps = eps;
        Ok(self)
    }
}

/// Implements the `with_betas`/`with_eps` setters for an Adam variant
/// holding a `config: AdamConfig` field.
macro_rules! adam_setters {
    ($rule:ty, $name:literal) => {
        impl $rule {
            /// Sets the first and second moment decay rates.
            ///
            /// # Errors
            ///
            /// [`crate::Error::Configuration`] unless both are in `[0, 1)`.
            pub fn with_betas(mut self, beta1: f64, beta2: f64) -> $crate::error::Result<Self> {
                self.config = self.config.betas($name, beta1, beta2)?;
                Ok(self)
            }

            /// Sets epsilon.
            ///
            /// # Errors
            ///
            /// [`crate::Error::Configuration`] unless `eps > 0`.
            pub fn with_eps(mut self, eps: f64) -> $crate::error::Result<Self> {
                self.config = self.config.eps($name, eps)?;
                Ok(self)
            }
        }
    };
}
pub(crate) use adam_setters;

/// Adaptive moment estimation.
///
/// The step counter `t` advances once per `update` call.
///
/// ```text
/// m = β1·m + (1 - β1)·g
/// v = β2·v + (1 - β2)·g²
/// m̂ = m / (1 - β1ᵗ)
/// v̂ = v / (1 - β2ᵗ)
/// p -= lr·m̂ / (√v̂ + eps)
/// ```
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    t: u64,
    slots: Slots,
}

impl Adam {
    /// Creates the rule with `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] unless `lr > 0`.
    pub fn new(lr: f64) -> Result<Self> {
        Ok(Self {
            config: AdamConfig::new("Adam", lr)?,
            t: 0,
            slots: Slots::new(2),
        })
    }

    /// Number of updates applied so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.t
    }
}

adam_setters!(Adam, "Adam");

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "Adam"
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
        self.slots.apply("Adam", layers, |p, g, m| {
            let [m1, m2] = m else { return p };
            *m1 = beta1 * *m1 + (1.0 - beta1) * g;
            *m2 = beta2 * *m2 + (1.0 - beta2) * g * g;
            let m_hat = *m1 / c1;
            let v_hat = *m2 / c2;
            p - lr * m_hat / (v_hat.sqrt() + eps)
        })?;
        self.t = t;
        Ok(())
    }
}
