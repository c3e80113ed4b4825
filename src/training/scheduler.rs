//! Learning rate scheduling driven by validation loss.
//!
//! The learning rate is cut by `factor` once validation loss has failed to
//! improve for more than `patience` epochs, never going below `min_lr`.
//! Scheduler state lives only as long as a training run; it is not saved
//! with checkpoints.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Reduce-on-plateau settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Multiplier applied on each reduction
    pub factor: f64,

    /// Non-improving epochs tolerated before a reduction
    pub patience: usize,

    /// Floor for the learning rate
    pub min_lr: f64,

    /// Relative improvement needed to count as better
    pub threshold: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.1,
            patience: 10,
            min_lr: 1e-5,
            threshold: 1e-4,
        }
    }
}

impl PlateauConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err("plateau factor must be in (0, 1)".to_string());
        }
        if self.min_lr < 0.0 {
            return Err("plateau min_lr must not be negative".to_string());
        }
        if self.threshold < 0.0 {
            return Err("plateau threshold must not be negative".to_string());
        }
        Ok(())
    }
}

/// Reduce the learning rate when a minimised metric stops improving
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    current_lr: f64,
    best_metric: Option<f64>,
    bad_epochs: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: PlateauConfig, base_lr: f64) -> Self {
        Self {
            config,
            current_lr: base_lr,
            best_metric: None,
            bad_epochs: 0,
        }
    }

    /// Get the current learning rate
    pub fn lr(&self) -> f64 {
        self.current_lr
    }

    /// Feed one epoch's validation loss and return the learning rate to use next
    pub fn step(&mut self, metric: f64) -> f64 {
        let improved = match self.best_metric {
            Some(best) => metric < best * (1.0 - self.config.threshold),
            None => true,
        };

        if improved {
            self.best_metric = Some(metric);
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.config.patience {
            let new_lr = (self.current_lr * self.config.factor).max(self.config.min_lr);
            if self.current_lr - new_lr > 1e-12 {
                info!(
                    "Reducing learning rate from {:.2e} to {:.2e}",
                    self.current_lr, new_lr
                );
                self.current_lr = new_lr;
            }
            self.bad_epochs = 0;
        }

        self.current_lr
    }
}
