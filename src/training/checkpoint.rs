//! Best-model checkpointing
//!
//! Weights are written with Burn's named MessagePack recorder at full
//! precision. The recorder replaces the file extension with `.mpk`, so the
//! configured path is usually given without one.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use tracing::info;

use crate::model::SiameseNetwork;
use crate::utils::error::{Result, SiameseError};

type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// File the recorder actually reads and writes for `path`
pub fn weights_file(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Overwrite the checkpoint at `path` with the given weights
pub fn save_weights<B: Backend>(network: &SiameseNetwork<B>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    network
        .clone()
        .save_file(path.to_path_buf(), &WeightsRecorder::new())
        .map_err(|e| SiameseError::Checkpoint(format!("Failed to save model: {:?}", e)))?;

    Ok(())
}

/// Restore weights into a network built with the same configuration
pub fn load_weights<B: Backend>(
    network: SiameseNetwork<B>,
    path: &Path,
    device: &B::Device,
) -> Result<SiameseNetwork<B>> {
    let file = weights_file(path);
    if !file.is_file() {
        return Err(SiameseError::CheckpointNotFound(file));
    }

    info!("Loading checkpoint from {:?}", file);
    network
        .load_file(path.to_path_buf(), &WeightsRecorder::new(), device)
        .map_err(|e| SiameseError::Checkpoint(format!("Failed to load model: {:?}", e)))
}

/// Tracks the best validation score of a training run.
///
/// Starts at 0.0, so an epoch scoring exactly 0.0 never counts as an
/// improvement; only strictly higher scores do.
#[derive(Debug, Clone, Default)]
pub struct BestScoreTracker {
    best: f64,
    best_epoch: Option<usize>,
}

impl BestScoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch's score; true when it beats every earlier epoch
    pub fn observe(&mut self, epoch: usize, score: f64) -> bool {
        if score > self.best {
            self.best = score;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}
