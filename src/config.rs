//! Run Configuration Module
//!
//! Everything a run reads but never mutates: model and output types, paths,
//! optimisation hyperparameters and the selection metric. The binary builds a
//! [`RunConfig`] from CLI flags or a saved JSON file and hands it down.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::model::SiameseNetworkConfig;
use crate::training::scheduler::PlateauConfig;
use crate::utils::error::{Result, SiameseError};
use crate::utils::metrics::SelectionMetric;

/// Supervision mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Regression,
    Classification,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Regression => "regression",
            OutputType::Classification => "classification",
        }
    }
}

impl FromStr for OutputType {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "regression" => Ok(OutputType::Regression),
            "classification" => Ok(OutputType::Classification),
            other => Err(SiameseError::Config(format!("unknown output type '{}'", other))),
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which model produces the outputs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Deep convolutional twin network
    Heavy,
    /// Small convolutional twin network
    Light,
    /// Uniform random outputs
    Random,
    /// Training-split mean or mode
    Average,
    /// Softmax class probabilities of the heavy network
    Probability,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Heavy => "heavy",
            ModelType::Light => "light",
            ModelType::Random => "random",
            ModelType::Average => "average",
            ModelType::Probability => "probability",
        }
    }

    /// Statistical models have no weights; they are derived from the training split
    pub fn is_statistical(&self) -> bool {
        matches!(self, ModelType::Random | ModelType::Average)
    }

    pub fn is_neural(&self) -> bool {
        matches!(self, ModelType::Heavy | ModelType::Light)
    }

    /// Whether test and inference must restore a checkpoint first
    pub fn has_weights(&self) -> bool {
        !self.is_statistical()
    }
}

impl FromStr for ModelType {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "heavy" => Ok(ModelType::Heavy),
            "light" => Ok(ModelType::Light),
            "random" => Ok(ModelType::Random),
            "average" => Ok(ModelType::Average),
            "probability" => Ok(ModelType::Probability),
            other => Err(SiameseError::Config(format!("unknown model type '{}'", other))),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output head shared by the network, the strategies and the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub output_type: OutputType,
    pub n_classes: usize,
}

impl Head {
    pub fn new(output_type: OutputType, n_classes: usize) -> Self {
        Self {
            output_type,
            n_classes,
        }
    }

    /// Width of the raw network output
    pub fn output_width(&self) -> usize {
        match self.output_type {
            OutputType::Regression => 1,
            OutputType::Classification => self.n_classes,
        }
    }

    /// Class a label or prediction falls into.
    ///
    /// Regression values snap to the nearest of `n_classes` evenly spaced
    /// levels in [0, 1]; classification values are class ids already.
    pub fn class_of(&self, value: f32) -> usize {
        let last = self.n_classes.saturating_sub(1);
        match self.output_type {
            OutputType::Regression => {
                let level = (value.clamp(0.0, 1.0) * last as f32).round();
                (level as usize).min(last)
            }
            OutputType::Classification => (value.max(0.0).round() as usize).min(last),
        }
    }
}

/// Compute device requested on the command line: `cpu`, `cuda` or `cuda:N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSelector {
    #[default]
    Cpu,
    Cuda(usize),
}

impl FromStr for DeviceSelector {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(DeviceSelector::Cpu),
            "cuda" => Ok(DeviceSelector::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(DeviceSelector::Cuda)
                .ok_or_else(|| SiameseError::Config(format!("unknown device '{}'", other))),
        }
    }
}

impl TryFrom<String> for DeviceSelector {
    type Error = SiameseError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceSelector> for String {
    fn from(device: DeviceSelector) -> Self {
        device.to_string()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Cpu => f.write_str("cpu"),
            DeviceSelector::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Configuration of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Name used for the run directory and prediction file names
    pub run_name: String,

    /// Root holding the `train`, `validation`, `test` and `inference` splits
    pub data_path: PathBuf,

    /// Run directory: logs, report, tensorboard events
    pub checkpoint_path: PathBuf,

    /// Best weights; the recorder appends `.mpk`
    pub model_path: PathBuf,

    /// Directory receiving prediction files
    pub prediction_path: PathBuf,

    /// Side length images are resized to
    pub input_size: usize,

    pub learning_rate: f64,
    pub batch_size: usize,
    pub number_of_epochs: usize,

    /// Class count (classification) or number of discrete damage levels (regression)
    pub n_classes: usize,

    pub output_type: OutputType,
    pub model_type: ModelType,
    pub device: DeviceSelector,

    /// Log the rolling score every this many batches
    pub log_step: usize,

    pub selection_metric: SelectionMetric,

    /// Seeds the random baseline and the training shuffle
    pub seed: u64,

    #[serde(default)]
    pub plateau: PlateauConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::for_run(Path::new("runs"), "quasi-siamese", Path::new("data"))
    }
}

impl RunConfig {
    /// Configuration whose artefacts live under `{checkpoint_root}/{run_name}`
    pub fn for_run(checkpoint_root: &Path, run_name: &str, data_path: &Path) -> Self {
        let run_dir = checkpoint_root.join(run_name);
        Self {
            run_name: run_name.to_string(),
            data_path: data_path.to_path_buf(),
            model_path: run_dir.join("best_model_wts"),
            prediction_path: run_dir.join("predictions"),
            checkpoint_path: run_dir,
            input_size: 32,
            learning_rate: 0.001,
            batch_size: 32,
            number_of_epochs: 100,
            n_classes: 4,
            output_type: OutputType::Classification,
            model_type: ModelType::Light,
            device: DeviceSelector::Cpu,
            log_step: 10,
            selection_metric: SelectionMetric::default(),
            seed: 42,
            plateau: PlateauConfig::default(),
        }
    }

    /// Move the run directory to `{checkpoint_root}/{run_name}`.
    ///
    /// `None` keeps the current checkpoint root or run name.
    pub fn relocate(&mut self, checkpoint_root: Option<&Path>, run_name: Option<&str>) {
        let root = match checkpoint_root {
            Some(root) => root.to_path_buf(),
            None => self
                .checkpoint_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        if let Some(run_name) = run_name {
            self.run_name = run_name.to_string();
        }

        let run_dir = root.join(&self.run_name);
        self.model_path = run_dir.join("best_model_wts");
        self.prediction_path = run_dir.join("predictions");
        self.checkpoint_path = run_dir;
    }

    pub fn head(&self) -> Head {
        Head::new(self.output_type, self.n_classes)
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.run_name.trim().is_empty() {
            problems.push("run_name must not be empty".to_string());
        }
        if self.n_classes < 2 {
            problems.push("n_classes must be at least 2".to_string());
        }
        if let Some(network) = SiameseNetworkConfig::for_model(self.model_type, self.head()) {
            // Every conv block halves the spatial size
            let min_size = 1usize << network.filters.len();
            if self.input_size < min_size {
                problems.push(format!(
                    "input_size must be at least {} for model type '{}'",
                    min_size, self.model_type
                ));
            }
        }
        if self.batch_size == 0 {
            problems.push("batch_size must be greater than 0".to_string());
        }
        if self.log_step == 0 {
            problems.push("log_step must be greater than 0".to_string());
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            problems.push("learning_rate must be positive".to_string());
        }
        if self.model_type == ModelType::Probability && self.output_type == OutputType::Regression
        {
            problems.push("model type 'probability' requires classification output".to_string());
        }
        if let Err(problem) = self.plateau.validate() {
            problems.push(problem);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SiameseError::Config(problems.join("; ")))
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SiameseError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
