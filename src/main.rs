//! Quasi-Siamese Damage Model CLI
//!
//! Trains, tests and runs inference with one model type on a before/after
//! image dataset. Every artefact of a run (configuration, log, checkpoint,
//! predictions, report, TensorBoard events) lands in the run directory
//! `{checkpoint_path}/{run_name}`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::optim::AdamConfig;
use clap::Parser;
use colored::Colorize;
use tracing::{error, info};

use quasi_siamese::backend::{backend_name, resolve_device, TrainingBackend};
use quasi_siamese::utils::logging::{init_logging, install_panic_hook, LogConfig};
use quasi_siamese::utils::tensorboard::{MetricsSink, NullSink, TensorBoardWriter};
use quasi_siamese::{
    Datasets, DeviceSelector, ModelType, Observer, OutputType, QuasiSiameseNetwork, RunConfig,
    RunReport, SelectionMetric, SiameseNetwork, RUN_CONFIG_FILE, RUN_LOG_FILE, RUN_REPORT_FILE,
};

/// Quasi-siamese before/after damage model
///
/// Compares a "before" and an "after" image of the same location and
/// predicts a damage score (regression) or damage class (classification).
#[derive(Parser, Debug)]
#[command(name = "quasi-siamese")]
#[command(version)]
#[command(about = "Before/after image damage model with Burn", long_about = None)]
struct Cli {
    /// Load the run configuration from a JSON file; other flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the run, used for the run directory and prediction files
    #[arg(long)]
    run_name: Option<String>,

    /// Dataset directory with train/validation/test/inference splits
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Directory holding one sub-directory per run [default: runs]
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    /// Side length images are resized to
    #[arg(long)]
    input_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    number_of_epochs: Option<usize>,

    /// Number of damage classes (also the number of regression levels)
    #[arg(long)]
    n_classes: Option<usize>,

    #[arg(long, value_enum)]
    output_type: Option<OutputType>,

    #[arg(long, value_enum)]
    model_type: Option<ModelType>,

    /// Compute device: cpu, cuda or cuda:N
    #[arg(long)]
    device: Option<DeviceSelector>,

    /// Log a batch summary every N batches (debug level)
    #[arg(long)]
    log_step: Option<usize>,

    /// Checkpoint selection metric, e.g. recall_micro or f1_weighted
    #[arg(long)]
    selection_metric: Option<SelectionMetric>,

    /// Random seed for shuffling and the random baseline
    #[arg(long)]
    seed: Option<u64>,

    /// Train and validate
    #[arg(long, default_value = "false")]
    train: bool,

    /// Evaluate on the test split
    #[arg(long, default_value = "false")]
    test: bool,

    /// Predict the unlabeled inference split
    #[arg(long, default_value = "false")]
    inference: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Do not write TensorBoard event files
    #[arg(long, default_value = "false")]
    no_tensorboard: bool,
}

impl Cli {
    /// Saved or default configuration with every given flag applied
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?,
            None => RunConfig::for_run(
                self.checkpoint_path.as_deref().unwrap_or(Path::new("runs")),
                self.run_name.as_deref().unwrap_or("quasi-siamese"),
                self.data_path.as_deref().unwrap_or(Path::new("data")),
            ),
        };

        if self.config.is_some() {
            if self.checkpoint_path.is_some() || self.run_name.is_some() {
                config.relocate(self.checkpoint_path.as_deref(), self.run_name.as_deref());
            }
            if let Some(data_path) = &self.data_path {
                config.data_path = data_path.clone();
            }
        }

        if let Some(value) = self.input_size {
            config.input_size = value;
        }
        if let Some(value) = self.learning_rate {
            config.learning_rate = value;
        }
        if let Some(value) = self.batch_size {
            config.batch_size = value;
        }
        if let Some(value) = self.number_of_epochs {
            config.number_of_epochs = value;
        }
        if let Some(value) = self.n_classes {
            config.n_classes = value;
        }
        if let Some(value) = self.output_type {
            config.output_type = value;
        }
        if let Some(value) = self.model_type {
            config.model_type = value;
        }
        if let Some(value) = self.device {
            config.device = value;
        }
        if let Some(value) = self.log_step {
            config.log_step = value;
        }
        if let Some(value) = self.selection_metric {
            config.selection_metric = value;
        }
        if let Some(value) = self.seed {
            config.seed = value;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !(cli.train || cli.test || cli.inference) {
        bail!("Nothing to do: pass at least one of --train, --test or --inference");
    }

    let config = cli.run_config()?;
    fs::create_dir_all(&config.checkpoint_path)?;
    fs::create_dir_all(&config.prediction_path)?;
    config.save(&config.checkpoint_path.join(RUN_CONFIG_FILE))?;

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    }
    .with_log_file(config.checkpoint_path.join(RUN_LOG_FILE));
    init_logging(&log_config)?;
    install_panic_hook();

    print_banner();
    info!("START with configuration: {:?}", config);
    info!("Backend: {}", backend_name());

    if let Err(err) = run(&cli, config) {
        error!("Run failed: {:#}", err);
        return Err(err);
    }

    info!("END");
    Ok(())
}

fn run(cli: &Cli, config: RunConfig) -> Result<()> {
    let device = resolve_device(&config.device)?;
    let observer = Observer::for_run(&config.run_name);

    let metrics: Box<dyn MetricsSink> = if cli.no_tensorboard {
        Box::new(NullSink)
    } else {
        Box::new(TensorBoardWriter::create(
            &config.checkpoint_path.join("tensorboard"),
            1,
        )?)
    };

    let report_path = config.checkpoint_path.join(RUN_REPORT_FILE);
    let mut report = RunReport::load(&report_path)?;

    let datasets = Datasets::from_config(&config);
    let optimizer = AdamConfig::new().init::<TrainingBackend, SiameseNetwork<TrainingBackend>>();
    let mut model = QuasiSiameseNetwork::<TrainingBackend, _>::new(
        config, datasets, device, optimizer, metrics, observer,
    )?;

    if cli.train {
        let summary = model.train(&mut report)?;
        report.save(&report_path)?;
        println!(
            "{} best validation score {:.4} (epoch {}) in {}",
            "Training complete:".green().bold(),
            summary.best_validation_score,
            summary
                .best_epoch
                .map(|e| e.to_string())
                .unwrap_or_else(|| "none".to_string()),
            summary.train_duration
        );
    }

    if cli.test {
        let summary = model.test(&mut report)?;
        report.save(&report_path)?;
        println!(
            "{} loss {:.4}, score {:.4} in {}",
            "Testing complete:".green().bold(),
            summary.loss,
            summary.score,
            summary.duration
        );
    }

    if cli.inference {
        let path = model.inference(&mut report)?;
        report.save(&report_path)?;
        println!("{} {:?}", "Predictions written to".green().bold(), path);
    }

    println!("{} {:?}", "Run report:".cyan(), report_path);
    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════╗
 ║   Quasi-Siamese Damage Model                             ║
 ║   Before/after image assessment with Burn + Rust         ║
 ╚══════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}
