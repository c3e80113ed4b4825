//! # Quasi-Siamese Damage Model
//!
//! A Rust library for before/after image damage assessment using the Burn
//! framework. Two images of the same location go through twin convolutional
//! branches; their features are combined into a regression score or class
//! logits.
//!
//! ## Features
//!
//! - **Learned models**: heavy and light twin networks, plus a softmax
//!   probability variant of the heavy network
//! - **Statistical baselines**: uniform random outputs and the training-split
//!   mean or mode, evaluated exactly like the networks
//! - **Rolling evaluation** with micro, macro and weighted precision, recall
//!   and F1 that do not depend on batch boundaries
//! - **Run artefacts**: per-epoch prediction files, a best-model checkpoint,
//!   a JSON run report and TensorBoard scalars
//!
//! ## Modules
//!
//! - `dataset`: Split directories, image decoding and batching
//! - `model`: Twin CNN architecture built with Burn
//! - `training`: Output strategies, epoch runner, scheduler, checkpoints and orchestration
//! - `utils`: Logging, metrics, errors and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use burn::optim::AdamConfig;
//! use quasi_siamese::backend::TrainingBackend;
//! use quasi_siamese::{Datasets, QuasiSiameseNetwork, RunConfig, RunReport};
//!
//! let config = RunConfig::for_run("runs".as_ref(), "flood", "data".as_ref());
//! let datasets = Datasets::from_config(&config);
//! let optimizer = AdamConfig::new().init();
//! let mut model = QuasiSiameseNetwork::<TrainingBackend, _>::new(
//!     config, datasets, Default::default(), optimizer,
//!     Box::new(NullSink), Observer::detached(),
//! )?;
//! let mut report = RunReport::new();
//! model.train(&mut report)?;
//! model.test(&mut report)?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{DeviceSelector, Head, ModelType, OutputType, RunConfig};
pub use dataset::{Datasets, PairBatch, PairLoader, Phase};
pub use model::{SiameseNetwork, SiameseNetworkConfig};
pub use training::{EpochRunner, OutputStrategy, QuasiSiameseNetwork, RunReport};
pub use utils::error::{Result, SiameseError};
pub use utils::metrics::{ConfusionMatrix, Score, SelectionMetric};
pub use utils::{MetricsSink, NullSink, Observer};

/// File name of the run report inside the run directory
pub const RUN_REPORT_FILE: &str = "run_report.json";

/// File name of the resolved configuration inside the run directory
pub const RUN_CONFIG_FILE: &str = "run_config.json";

/// File name of the log copy inside the run directory
pub const RUN_LOG_FILE: &str = "run.log";

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
