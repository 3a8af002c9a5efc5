//! Training configuration.

use crate::error::{Error, Result};

/// Knobs for [`Sequential::fit`](super::Sequential::fit) and the parts of
/// [`Sequential`](super::Sequential) that are not layer hyperparameters.
///
/// # Example
///
/// ```rust
/// use cellnet::model::TrainConfig;
///
/// let config = TrainConfig::default()
///     .with_epochs(100)
///     .with_batch_size(4)
///     .with_seed(42)
///     .with_history(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainConfig {
    /// Passes over the whole dataset.
    pub epochs: usize,
    /// Examples whose gradients accumulate before each optimizer update.
    pub batch_size: usize,
    /// Record the mean loss after every epoch.
    pub history: bool,
    /// Seed for parameter initialization; `None` draws from the OS.
    pub seed: Option<u64>,
    /// Worker count for parallel inference; `None` uses every available
    /// core.
    pub workers: Option<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 1,
            history: false,
            seed: None,
            workers: None,
        }
    }
}

impl TrainConfig {
    /// Sets the number of epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables or disables per-epoch loss history.
    #[must_use]
    pub fn with_history(mut self, history: bool) -> Self {
        self.history = history;
        self
    }

    /// Fixes the initialization seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fixes the parallel inference worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Checks that every count is positive.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config("epochs must be at least 1, got 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be at least 1, got 0"));
        }
        if self.workers == Some(0) {
            return Err(Error::config("worker count must be at least 1, got 0"));
        }
        Ok(())
    }
}
