//! Dataset module for before/after image pairs
//!
//! This module provides:
//! - Reading a split directory (`before/`, `after/`, `labels.txt`)
//! - Burn `Dataset` and `Batcher` implementations for image pairs
//! - A deterministic batch loader with parallel image decoding
//!
//! ## Layout
//!
//! ```text
//! data_path/
//! ├── train/
//! │   ├── before/<filename>
//! │   ├── after/<filename>
//! │   └── labels.txt          # "<filename> <label>" per line
//! ├── validation/ ...
//! ├── test/ ...
//! └── inference/
//!     ├── before/<filename>
//!     └── after/<filename>
//! ```

pub mod burn_dataset;
pub mod loader;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::SiameseError;

pub use burn_dataset::{PairBatch, PairBatcher, PairDataset, PairItem, PairRecord};
pub use loader::{Datasets, PairLoader};

/// Name of the label file inside a labeled split
pub const LABELS_FILE: &str = "labels.txt";

/// ImageNet channel means used to normalise inputs
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations used to normalise inputs
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Dataset split, also the phase a pass runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Validation,
    Test,
    Inference,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Validation => "validation",
            Phase::Test => "test",
            Phase::Inference => "inference",
        }
    }

    /// Whether samples of this split carry labels
    pub fn is_labeled(&self) -> bool {
        !matches!(self, Phase::Inference)
    }
}

impl FromStr for Phase {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Phase::Train),
            "validation" => Ok(Phase::Validation),
            "test" => Ok(Phase::Test),
            "inference" => Ok(Phase::Inference),
            other => Err(SiameseError::Config(format!("unknown phase '{}'", other))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
