//! Train, test and inference orchestration for one model type.

use std::path::PathBuf;
use std::time::Instant;

use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use tracing::{info, warn};

use crate::config::{Head, ModelType, RunConfig};
use crate::dataset::{Datasets, Phase};
use crate::model::SiameseNetwork;
use crate::training::checkpoint::{load_weights, save_weights, BestScoreTracker};
use crate::training::epoch::EpochRunner;
use crate::training::report::{ModelKind, RunReport, TestSummary, TrainingSummary};
use crate::training::scheduler::ReduceLrOnPlateau;
use crate::training::strategy::OutputStrategy;
use crate::utils::error::Result;
use crate::utils::logging::Observer;
use crate::utils::tensorboard::MetricsSink;
use crate::utils::{format_duration, readable_float, utc_timestamp};

/// Before/after damage model with its optimizer, scheduler and output strategy
pub struct QuasiSiameseNetwork<B: AutodiffBackend, O> {
    config: RunConfig,
    head: Head,
    datasets: Datasets,
    device: B::Device,
    strategy: OutputStrategy<B>,
    optimizer: O,
    scheduler: ReduceLrOnPlateau,
    runner: EpochRunner,
    metrics: Box<dyn MetricsSink>,
}

impl<B, O> QuasiSiameseNetwork<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SiameseNetwork<B>, B>,
{
    /// Build the strategy for the configured model type.
    ///
    /// The `average` model reads the training labels here, so a missing or
    /// empty training split fails at construction.
    pub fn new(
        config: RunConfig,
        datasets: Datasets,
        device: B::Device,
        optimizer: O,
        metrics: Box<dyn MetricsSink>,
        observer: Observer,
    ) -> Result<Self> {
        config.validate()?;
        let head = config.head();

        let training_labels = if config.model_type == ModelType::Average {
            Some(datasets.labels(Phase::Train)?)
        } else {
            None
        };
        let strategy =
            OutputStrategy::new(config.model_type, head, &device, training_labels.as_deref())?;

        info!(
            "Model type '{}' ({} strategy), {} output with {} classes",
            config.model_type,
            strategy.name(),
            config.output_type,
            config.n_classes
        );

        Ok(Self {
            scheduler: ReduceLrOnPlateau::new(config.plateau, config.learning_rate),
            runner: EpochRunner::new(&config, observer),
            head,
            datasets,
            device,
            strategy,
            optimizer,
            metrics,
            config,
        })
    }

    /// Train for the configured number of epochs, validating after each one.
    ///
    /// The weights are checkpointed whenever the validation score strictly
    /// beats every earlier epoch.
    pub fn train(&mut self, report: &mut RunReport) -> Result<TrainingSummary> {
        let (_, train_loader) = self.datasets.load(Phase::Train)?;
        let (_, validation_loader) = self.datasets.load(Phase::Validation)?;

        let mut tracker = BestScoreTracker::new();
        let mut summary = TrainingSummary {
            train_start_time: utc_timestamp(),
            ..TrainingSummary::default()
        };
        let start = Instant::now();

        for epoch in 1..=self.config.number_of_epochs {
            let lr = self.scheduler.lr();

            let train = self.runner.run(
                epoch,
                Phase::Train,
                &train_loader,
                &mut self.strategy,
                &mut self.optimizer,
                lr,
                &self.device,
            )?;
            summary.train_loss.push(readable_float(train.loss));
            summary.train_score.push(readable_float(train.selected));

            let validation = self.runner.run(
                epoch,
                Phase::Validation,
                &validation_loader,
                &mut self.strategy,
                &mut self.optimizer,
                lr,
                &self.device,
            )?;
            summary.validation_loss.push(readable_float(validation.loss));
            summary.validation_score.push(readable_float(validation.selected));

            self.metrics.add_scalar("Train/Loss", train.loss, epoch)?;
            self.metrics.add_scalar("Train/Score", train.selected, epoch)?;
            self.metrics.add_scalar("Validation/Loss", validation.loss, epoch)?;
            self.metrics.add_scalar("Validation/Score", validation.selected, epoch)?;

            self.scheduler.step(validation.loss);

            if tracker.observe(epoch, validation.selected) {
                if let Some(network) = self.strategy.network() {
                    info!(
                        "Epoch {:03} Checkpoint: Saving to {:?}",
                        epoch, self.config.model_path
                    );
                    save_weights(network, &self.config.model_path)?;
                }
            }
        }
        self.metrics.flush()?;

        summary.train_end_time = utc_timestamp();
        summary.train_duration = format_duration(start.elapsed().as_secs_f64());
        summary.best_validation_score = readable_float(tracker.best());
        summary.best_epoch = tracker.best_epoch();

        info!("Training complete in {}", summary.train_duration);
        info!("Best validation score: {:.4}", tracker.best());
        if tracker.best_epoch().is_none() && self.strategy.network().is_some() {
            warn!("Validation score never rose above 0.0; no checkpoint was written");
        }

        report.training = Some(summary.clone());
        Ok(summary)
    }

    /// One pass over the test split with restored weights or a fresh baseline
    pub fn test(&mut self, report: &mut RunReport) -> Result<TestSummary> {
        self.restore()?;
        let (_, test_loader) = self.datasets.load(Phase::Test)?;

        let start_time = utc_timestamp();
        let start = Instant::now();
        let lr = self.scheduler.lr();
        let outcome = self.runner.run(
            1,
            Phase::Test,
            &test_loader,
            &mut self.strategy,
            &mut self.optimizer,
            lr,
            &self.device,
        )?;

        let summary = TestSummary {
            start_time,
            end_time: utc_timestamp(),
            duration: format_duration(start.elapsed().as_secs_f64()),
            loss: readable_float(outcome.loss),
            score: readable_float(outcome.selected),
        };
        info!("Testing complete in {}", summary.duration);

        report
            .tests
            .insert(ModelKind::of(self.config.model_type), summary.clone());
        Ok(summary)
    }

    /// Predict the unlabeled inference split; returns the prediction file
    pub fn inference(&mut self, report: &mut RunReport) -> Result<PathBuf> {
        self.restore()?;
        let (_, loader) = self.datasets.load(Phase::Inference)?;

        let start = Instant::now();
        let inner = self.strategy.valid();
        let path = self.runner.infer(&loader, &inner, &self.device)?;
        info!(
            "Inference complete in {}",
            format_duration(start.elapsed().as_secs_f64())
        );

        report
            .inference
            .insert(ModelKind::of(self.config.model_type), path.clone());
        Ok(path)
    }

    /// Load the checkpoint, or recompute the baseline from the training split
    fn restore(&mut self) -> Result<()> {
        if self.config.model_type.has_weights() {
            if let Some(network) = self.strategy.network().cloned() {
                let restored = load_weights(network, &self.config.model_path, &self.device)?;
                self.strategy.replace_network(restored);
            }
        } else {
            let labels = self.datasets.labels(Phase::Train)?;
            self.strategy.refresh_average(self.head, &labels)?;
        }
        Ok(())
    }
}
