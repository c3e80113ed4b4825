//! Run report
//!
//! A typed record of what the orchestrators did, flattened to a JSON object
//! on save. Test and inference keys carry the model kind as a suffix
//! (`test_loss_heavy`, `test_loss_average-statistical`) so reports from
//! different model types can share one file. Keys already present in the
//! file and not rewritten by this run are kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ModelType;
use crate::utils::error::{Result, ResultExt, SiameseError};

/// Model type plus whether it is a statistical baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelKind {
    pub model_type: ModelType,
    pub statistical: bool,
}

impl ModelKind {
    pub fn of(model_type: ModelType) -> Self {
        Self {
            model_type,
            statistical: model_type.is_statistical(),
        }
    }

    /// `{base}_{model_type}`, with `-statistical` appended for baselines
    pub fn report_key(&self, base: &str) -> String {
        if self.statistical {
            format!("{}_{}-statistical", base, self.model_type)
        } else {
            format!("{}_{}", base, self.model_type)
        }
    }
}

/// Training phase results, serialized under their own key names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub train_start_time: String,
    pub train_end_time: String,
    pub train_duration: String,
    pub train_loss: Vec<f64>,
    pub train_score: Vec<f64>,
    pub validation_loss: Vec<f64>,
    pub validation_score: Vec<f64>,
    pub best_validation_score: f64,
    pub best_epoch: Option<usize>,
}

/// Test phase results for one model kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSummary {
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
    pub loss: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub training: Option<TrainingSummary>,
    pub tests: BTreeMap<ModelKind, TestSummary>,
    /// Prediction file written by each inference run
    pub inference: BTreeMap<ModelKind, PathBuf>,
    inherited: Map<String, Value>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing report file, or an empty report if there is none
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run report {:?}", path))?;
        let inherited = match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => map,
            _ => {
                return Err(SiameseError::Serialization(format!(
                    "run report {:?} is not a JSON object",
                    path
                )))
            }
        };
        debug!("Merging {} existing report keys from {:?}", inherited.len(), path);

        Ok(Self {
            inherited,
            ..Self::default()
        })
    }

    /// Flat JSON object with every key of this run on top of the inherited ones
    pub fn to_json(&self) -> Result<Value> {
        let mut map = self.inherited.clone();

        if let Some(training) = &self.training {
            if let Value::Object(fields) = serde_json::to_value(training)? {
                map.extend(fields);
            }
        }

        for (kind, test) in &self.tests {
            map.insert(kind.report_key("test_start_time"), test.start_time.clone().into());
            map.insert(kind.report_key("test_end_time"), test.end_time.clone().into());
            map.insert(kind.report_key("test_duration"), test.duration.clone().into());
            map.insert(kind.report_key("test_loss"), test.loss.into());
            map.insert(kind.report_key("test_score"), test.score.into());
            map.insert(kind.report_key("test"), true.into());
        }

        for (kind, path) in &self.inference {
            map.insert(
                kind.report_key("inference_predictions"),
                path.display().to_string().into(),
            );
        }

        Ok(Value::Object(map))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.to_json()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
