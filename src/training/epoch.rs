//! One pass over a split.
//!
//! The runner pulls batches from a loader, turns them into outputs through an
//! [`OutputStrategy`], computes the loss, applies one optimizer step per batch
//! in the training phase, feeds the [`RollingEvaluator`] and writes a
//! prediction file for the pass.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use burn::nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::{Head, ModelType, OutputType, RunConfig};
use crate::dataset::{Phase, PairLoader};
use crate::model::SiameseNetwork;
use crate::training::evaluator::RollingEvaluator;
use crate::training::strategy::{ModelOutputs, OutputStrategy, RawOutputs};
use crate::utils::error::{Result, SiameseError};
use crate::utils::logging::Observer;
use crate::utils::metrics::{Score, SelectionMetric};

/// Header of labeled prediction files
pub const LABELED_HEADER: &str = "filename label prediction";

/// Header of inference prediction files
pub const INFERENCE_HEADER: &str = "filename prediction";

/// Name of the prediction file of one pass
pub fn prediction_file_name(
    run_name: &str,
    phase: Phase,
    epoch: usize,
    model: ModelType,
) -> String {
    format!(
        "{}-split_{}-epoch_{:03}-model_{}-predictions.txt",
        run_name, phase, epoch, model
    )
}

/// Loss and score of a finished pass
#[derive(Debug, Clone, PartialEq)]
pub struct EpochOutcome {
    /// Sample-weighted mean batch loss
    pub loss: f64,
    pub score: Score,
    /// The scalar named by the selection metric
    pub selected: f64,
}

/// Loss function matching the output type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    MeanSquaredError,
    CrossEntropy,
}

impl Criterion {
    pub fn for_head(head: Head) -> Self {
        match head.output_type {
            OutputType::Regression => Criterion::MeanSquaredError,
            OutputType::Classification => Criterion::CrossEntropy,
        }
    }

    /// Mean loss of a batch as a one-element tensor
    pub fn loss<B: Backend>(
        &self,
        raw: &RawOutputs<B>,
        labels: &[f32],
        device: &B::Device,
    ) -> Result<Tensor<B, 1>> {
        match (self, raw) {
            (Criterion::MeanSquaredError, RawOutputs::Regression(scores)) => {
                let targets = Tensor::<B, 1>::from_data(
                    TensorData::new(labels.to_vec(), [labels.len()]),
                    device,
                );
                Ok(MseLoss::new().forward(scores.clone(), targets, Reduction::Mean))
            }
            (Criterion::CrossEntropy, RawOutputs::Classification(logits)) => {
                let classes: Vec<i64> = labels.iter().map(|&l| l.round() as i64).collect();
                let targets = Tensor::<B, 1, Int>::from_data(
                    TensorData::new(classes, [labels.len()]),
                    device,
                );
                Ok(CrossEntropyLossConfig::new()
                    .init(device)
                    .forward(logits.clone(), targets))
            }
            _ => Err(SiameseError::Model(format!(
                "{:?} does not apply to these outputs",
                self
            ))),
        }
    }
}

enum PredictionBody {
    Lines(BufWriter<File>),
    Probabilities(Vec<Vec<f32>>),
}

/// Prediction file written to a `.partial` sibling until the pass finishes
struct PredictionFile {
    path: PathBuf,
    partial: PathBuf,
    body: PredictionBody,
}

impl PredictionFile {
    fn create(path: PathBuf, header: &str, probabilities: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let body = if probabilities {
            PredictionBody::Probabilities(Vec::new())
        } else {
            let mut writer = BufWriter::new(File::create(&partial)?);
            writeln!(writer, "{}", header)?;
            PredictionBody::Lines(writer)
        };

        Ok(Self {
            path,
            partial,
            body,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if let PredictionBody::Lines(writer) = &mut self.body {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }

    fn push_rows(&mut self, rows: Vec<Vec<f32>>) {
        if let PredictionBody::Probabilities(all) = &mut self.body {
            all.extend(rows);
        }
    }

    /// Write the trailer (text files only) and move the file into place
    fn finish(self, trailer: Option<&str>) -> Result<PathBuf> {
        match self.body {
            PredictionBody::Lines(mut writer) => {
                if let Some(trailer) = trailer {
                    writeln!(writer, "{}", trailer)?;
                }
                writer.flush()?;
            }
            PredictionBody::Probabilities(rows) => {
                fs::write(&self.partial, serde_json::to_string(&rows)?)?;
            }
        }
        fs::rename(&self.partial, &self.path)?;
        Ok(self.path)
    }
}

/// Runs single passes over a split for one model type
#[derive(Debug, Clone)]
pub struct EpochRunner {
    head: Head,
    model_type: ModelType,
    run_name: String,
    prediction_dir: PathBuf,
    log_step: usize,
    selection: SelectionMetric,
    rng: ChaCha8Rng,
    observer: Observer,
}

impl EpochRunner {
    pub fn new(config: &RunConfig, observer: Observer) -> Self {
        Self {
            head: config.head(),
            model_type: config.model_type,
            run_name: config.run_name.clone(),
            prediction_dir: config.prediction_path.clone(),
            log_step: config.log_step.max(1),
            selection: config.selection_metric,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            observer,
        }
    }

    pub fn prediction_path(&self, phase: Phase, epoch: usize) -> PathBuf {
        self.prediction_dir.join(prediction_file_name(
            &self.run_name,
            phase,
            epoch,
            self.model_type,
        ))
    }

    /// One pass in the train, validation or test phase.
    ///
    /// Only the train phase records gradients and steps the optimizer; the
    /// other phases run on the inner backend.
    #[allow(clippy::too_many_arguments)]
    pub fn run<B, O>(
        &mut self,
        epoch: usize,
        phase: Phase,
        loader: &PairLoader,
        strategy: &mut OutputStrategy<B>,
        optimizer: &mut O,
        lr: f64,
        device: &B::Device,
    ) -> Result<EpochOutcome>
    where
        B: AutodiffBackend,
        O: Optimizer<SiameseNetwork<B>, B>,
    {
        let head = self.head;
        let criterion = Criterion::for_head(head);

        match phase {
            Phase::Train => self.pass::<B, _>(
                epoch,
                phase,
                loader,
                device,
                |image1, image2, labels, rng| {
                    let outputs = strategy.outputs(head, image1, image2, rng)?;
                    let loss = criterion.loss(&outputs.raw, labels, device)?;
                    let batch_loss = loss.clone().into_scalar().elem::<f64>();

                    if let Some(network) = strategy.network().cloned() {
                        let grads = GradientsParams::from_grads(loss.backward(), &network);
                        strategy.replace_network(optimizer.step(lr, network, grads));
                    }
                    Ok((outputs, batch_loss))
                },
            ),
            Phase::Validation | Phase::Test => {
                let inner = strategy.valid();
                self.evaluate(epoch, phase, loader, &inner, device)
            }
            Phase::Inference => Err(SiameseError::Config(
                "the inference phase has no labels to evaluate".to_string(),
            )),
        }
    }

    /// Evaluation pass with a strategy that needs no gradients
    pub fn evaluate<B: Backend>(
        &mut self,
        epoch: usize,
        phase: Phase,
        loader: &PairLoader,
        strategy: &OutputStrategy<B>,
        device: &B::Device,
    ) -> Result<EpochOutcome> {
        if !phase.is_labeled() {
            return Err(SiameseError::Config(format!(
                "phase '{}' cannot be evaluated",
                phase
            )));
        }
        let head = self.head;
        let criterion = Criterion::for_head(head);

        self.pass::<B, _>(epoch, phase, loader, device, |image1, image2, labels, rng| {
            let outputs = strategy.outputs(head, image1, image2, rng)?;
            let batch_loss = criterion
                .loss(&outputs.raw, labels, device)?
                .into_scalar()
                .elem::<f64>();
            Ok((outputs, batch_loss))
        })
    }

    /// Predictions for an unlabeled split; returns the prediction file
    pub fn infer<B: Backend>(
        &mut self,
        loader: &PairLoader,
        strategy: &OutputStrategy<B>,
        device: &B::Device,
    ) -> Result<PathBuf> {
        let span = self.observer.epoch_span(Phase::Inference.as_str(), 1);
        let _entered = span.enter();

        let mut file = PredictionFile::create(
            self.prediction_path(Phase::Inference, 1),
            INFERENCE_HEADER,
            self.writes_probabilities(),
        )?;

        let mut samples = 0;
        for batch in loader.iter::<B>(1, device) {
            let batch = batch?;
            let outputs = strategy.outputs(self.head, batch.image1, batch.image2, &mut self.rng)?;

            if self.writes_probabilities() {
                file.push_rows(outputs.raw.rows()?);
            } else {
                for (filename, prediction) in batch.filenames.iter().zip(&outputs.predictions) {
                    file.write_line(&format!("{} {}", filename, self.format_value(*prediction)))?;
                }
            }
            samples += batch.filenames.len();
        }

        let path = file.finish(None)?;
        info!("Inference wrote {} predictions to {:?}", samples, path);
        Ok(path)
    }

    fn writes_probabilities(&self) -> bool {
        self.model_type == ModelType::Probability
    }

    fn format_value(&self, value: f32) -> String {
        match self.head.output_type {
            OutputType::Regression => format!("{:?}", value),
            OutputType::Classification => format!("{}", value.round() as i64),
        }
    }

    fn pass<B, F>(
        &mut self,
        epoch: usize,
        phase: Phase,
        loader: &PairLoader,
        device: &B::Device,
        mut step: F,
    ) -> Result<EpochOutcome>
    where
        B: Backend,
        F: FnMut(Tensor<B, 4>, Tensor<B, 4>, &[f32], &mut ChaCha8Rng) -> Result<(ModelOutputs<B>, f64)>,
    {
        let span = self.observer.epoch_span(phase.as_str(), epoch);
        let _entered = span.enter();

        let mut evaluator = RollingEvaluator::new(self.head);
        let mut file = PredictionFile::create(
            self.prediction_path(phase, epoch),
            LABELED_HEADER,
            self.writes_probabilities(),
        )?;
        let batches = loader.num_batches();

        for (index, batch) in loader.iter::<B>(epoch, device).enumerate() {
            let batch = batch?;
            let labels = batch.labels.ok_or_else(|| {
                SiameseError::Dataset(format!("unlabeled batch in phase '{}'", phase))
            })?;

            let (outputs, batch_loss) = step(batch.image1, batch.image2, &labels, &mut self.rng)?;

            if self.writes_probabilities() {
                file.push_rows(outputs.raw.rows()?);
            } else {
                for ((filename, label), prediction) in batch
                    .filenames
                    .iter()
                    .zip(&labels)
                    .zip(&outputs.predictions)
                {
                    file.write_line(&format!(
                        "{} {} {}",
                        filename,
                        self.format_value(*label),
                        self.format_value(*prediction)
                    ))?;
                }
            }

            let batch_score = evaluator.add(&labels, &outputs.predictions, batch_loss);

            let step_index = index + 1;
            if step_index % self.log_step == 0 {
                debug!(
                    "Epoch: {:03} Phase: {:10} Batch {:04}/{:04}: Loss: {:.4} Accuracy: {:.4} Correct: {} Total: {}",
                    epoch, phase.as_str(), step_index, batches, batch_loss,
                    batch_score.accuracy, batch_score.correct, batch_score.total
                );
                let rolling = evaluator.score();
                debug!(
                    "Epoch: {:03} Phase: {:10} Batch {:04}/{:04}: Running {}: {:.4} Accuracy: {:.4}",
                    epoch, phase.as_str(), step_index, batches, self.selection,
                    rolling.select(self.selection), rolling.accuracy
                );
            }
        }

        let loss = evaluator.loss();
        let score = evaluator.score();
        let selected = score.select(self.selection);

        let trailer = format!(
            "Epoch {:03} ({}) {}: {:.4}",
            epoch,
            self.selection.average.as_str(),
            self.selection.measure.as_str(),
            selected
        );
        file.finish(Some(&trailer))?;

        info!(
            "Epoch {:03} Phase: {:10}: Loss: {:.4} Accuracy: {:.4} Correct: {} Total: {}",
            epoch,
            phase.as_str(),
            loss,
            score.accuracy,
            score.correct,
            score.total
        );
        for (name, averaged) in [
            ("Micro", &score.micro),
            ("Macro", &score.macro_avg),
            ("Weighted", &score.weighted),
        ] {
            info!(
                "Epoch {:03} Phase: {:10}: ({}) Precision: {:.4} Recall: {:.4} F1: {:.4}",
                epoch,
                phase.as_str(),
                name,
                averaged.precision,
                averaged.recall,
                averaged.f1
            );
        }
        if let Some(mse) = evaluator.mean_squared_error() {
            debug!("Epoch {:03} Phase: {:10}: MSE: {:.4}", epoch, phase.as_str(), mse);
        }
        debug!(
            "Epoch {:03} Phase: {:10}: {}",
            epoch,
            phase.as_str(),
            evaluator.confusion()
        );

        Ok(EpochOutcome {
            loss,
            score,
            selected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::dataset::Datasets;
    use crate::training::fixtures::{write_split, FixtureSplit};
    use burn::backend::Autodiff;
    use burn::module::AutodiffModule;
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    type TestBackend = Autodiff<NdArray>;

    fn config(root: &Path, output_type: OutputType, model_type: ModelType) -> RunConfig {
        let mut config = RunConfig::for_run(&root.join("runs"), "unit", &root.join("data"));
        config.output_type = output_type;
        config.model_type = model_type;
        config.input_size = 4;
        config.batch_size = 2;
        config.log_step = 1;
        config
    }

    fn loader(config: &RunConfig, phase: Phase) -> PairLoader {
        Datasets::from_config(config).load(phase).unwrap().1
    }

    #[test]
    fn test_train_pass_updates_weights_and_writes_predictions() {
        let root = tempdir().unwrap();
        let config = config(root.path(), OutputType::Classification, ModelType::Light);
        write_split(&config.data_path, "train", FixtureSplit::classes(&[0, 1, 2, 3, 1]));

        let device = Default::default();
        let mut strategy =
            OutputStrategy::<TestBackend>::new(config.model_type, config.head(), &device, None)
                .unwrap();
        let mut optimizer = AdamConfig::new().init::<TestBackend, SiameseNetwork<TestBackend>>();
        let mut runner = EpochRunner::new(&config, Observer::detached());

        let before = strategy.network().unwrap().valid();
        let loader = loader(&config, Phase::Train);
        let outcome = runner
            .run(1, Phase::Train, &loader, &mut strategy, &mut optimizer, 0.01, &device)
            .unwrap();

        assert!(outcome.loss.is_finite() && outcome.loss > 0.0);
        assert_eq!(outcome.score.total, 5);

        // Weights moved after the optimizer steps
        let input = Tensor::<NdArray, 4>::ones([1, 3, 4, 4], &device);
        let old = before.forward(input.clone(), input.clone()).into_data().to_vec::<f32>().unwrap();
        let new = strategy
            .network()
            .unwrap()
            .valid()
            .forward(input.clone(), input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_ne!(old, new);

        let path = runner.prediction_path(Phase::Train, 1);
        assert!(path.ends_with("unit-split_train-epoch_001-model_light-predictions.txt"));
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], LABELED_HEADER);
        assert!(lines[6].starts_with("Epoch 001 (micro) recall: "));
        assert!(!path.with_extension("txt.partial").exists());
    }

    #[test]
    fn test_validation_pass_is_deterministic() {
        let root = tempdir().unwrap();
        let config = config(root.path(), OutputType::Classification, ModelType::Light);
        write_split(&config.data_path, "validation", FixtureSplit::classes(&[0, 1, 2, 3]));

        let device = Default::default();
        let mut strategy =
            OutputStrategy::<TestBackend>::new(config.model_type, config.head(), &device, None)
                .unwrap();
        let mut optimizer = AdamConfig::new().init::<TestBackend, SiameseNetwork<TestBackend>>();
        let mut runner = EpochRunner::new(&config, Observer::detached());
        let loader = loader(&config, Phase::Validation);

        let first = runner
            .run(1, Phase::Validation, &loader, &mut strategy, &mut optimizer, 0.01, &device)
            .unwrap();
        let second = runner
            .run(2, Phase::Validation, &loader, &mut strategy, &mut optimizer, 0.01, &device)
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_average_regression_loss_uses_unclamped_mean() {
        let root = tempdir().unwrap();
        let config = config(root.path(), OutputType::Regression, ModelType::Average);
        write_split(&config.data_path, "test", FixtureSplit::values(&[0.0, 1.0, 0.5]));

        let device = Default::default();
        let strategy = OutputStrategy::<NdArray>::new(
            config.model_type,
            config.head(),
            &device,
            Some(&[1.0, 1.0, 1.0, 2.0, 3.0]),
        )
        .unwrap();
        let mut runner = EpochRunner::new(&config, Observer::detached());

        let outcome = runner
            .evaluate(1, Phase::Test, &loader(&config, Phase::Test), &strategy, &device)
            .unwrap();

        // Loss against the raw 1.6; batches of 2 and 1 are sample-weighted
        let expected = [(0.0f64, 1.6f64), (1.0, 1.6), (0.5, 1.6)]
            .iter()
            .map(|(l, o)| (o - l).powi(2))
            .sum::<f64>()
            / 3.0;
        assert!((outcome.loss - expected).abs() < 1e-5);

        // Predictions are clamped to 1.0, which only matches the label 1.0
        assert_eq!(outcome.score.correct, 1);
        let content = fs::read_to_string(runner.prediction_path(Phase::Test, 1)).unwrap();
        assert!(content.contains("000.png 0.0 1.0"));
    }

    #[test]
    fn test_probability_pass_writes_rows() {
        let root = tempdir().unwrap();
        let mut config = config(root.path(), OutputType::Classification, ModelType::Probability);
        // The heavy backbone pools four times
        config.input_size = 16;
        write_split(&config.data_path, "test", FixtureSplit::classes(&[0, 3, 2]));

        let device = Default::default();
        let strategy =
            OutputStrategy::<NdArray>::new(config.model_type, config.head(), &device, None)
                .unwrap();
        let mut runner = EpochRunner::new(&config, Observer::detached());
        let loader = loader(&config, Phase::Test);

        runner.evaluate(1, Phase::Test, &loader, &strategy, &device).unwrap();

        let content = fs::read_to_string(runner.prediction_path(Phase::Test, 1)).unwrap();
        assert!(!content.contains(LABELED_HEADER));
        let rows: Vec<Vec<f32>> = serde_json::from_str(&content).unwrap();
        assert_eq!(rows.len(), 3);
        for row in rows {
            assert_eq!(row.len(), 4);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_inference_phase_is_rejected_by_run() {
        let root = tempdir().unwrap();
        let config = config(root.path(), OutputType::Classification, ModelType::Random);
        write_split(&config.data_path, "inference", FixtureSplit::unlabeled(2));

        let device = Default::default();
        let mut strategy = OutputStrategy::<TestBackend>::Random;
        let mut optimizer = AdamConfig::new().init::<TestBackend, SiameseNetwork<TestBackend>>();
        let mut runner = EpochRunner::new(&config, Observer::detached());
        let loader = loader(&config, Phase::Inference);

        let err = runner
            .run(1, Phase::Inference, &loader, &mut strategy, &mut optimizer, 0.01, &device)
            .unwrap_err();
        assert!(matches!(err, SiameseError::Config(_)));

        let path = runner.infer(&loader, &strategy.valid(), &device).unwrap();
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], INFERENCE_HEADER);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].split(' ').count(), 2);
    }

    #[test]
    fn test_criterion_rejects_mismatched_outputs() {
        let device = Default::default();
        let raw = RawOutputs::<NdArray>::Regression(Tensor::zeros([2], &device));
        assert!(Criterion::CrossEntropy.loss(&raw, &[0.0, 1.0], &device).is_err());
        assert!(Criterion::MeanSquaredError.loss(&raw, &[0.0, 1.0], &device).is_ok());
    }
}
