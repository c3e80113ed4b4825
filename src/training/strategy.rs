//! Output strategies: how a batch of image pairs becomes raw outputs and
//! predictions.
//!
//! Each model type maps to one variant that carries exactly the state it
//! needs. Invalid combinations (probabilities for a regression head, an
//! average without training labels) are rejected when the strategy is built.

use burn::module::AutodiffModule;
use burn::tensor::{
    activation::softmax,
    backend::{AutodiffBackend, Backend},
    Int, Tensor, TensorData,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Head, ModelType, OutputType};
use crate::model::{SiameseNetwork, SiameseNetworkConfig};
use crate::utils::error::{Result, SiameseError};

/// Training-split average used by the `average` baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AverageLabel {
    /// Mean label (regression)
    Mean(f32),
    /// Most frequent class (classification)
    Mode(usize),
}

impl AverageLabel {
    /// Mean or mode of the training labels; ties in the mode go to the class seen first
    pub fn from_labels(head: Head, labels: &[f32]) -> Result<Self> {
        if labels.is_empty() {
            return Err(SiameseError::Dataset(
                "cannot compute an average label from an empty training split".to_string(),
            ));
        }

        match head.output_type {
            OutputType::Regression => {
                let sum: f64 = labels.iter().map(|&l| f64::from(l)).sum();
                Ok(AverageLabel::Mean((sum / labels.len() as f64) as f32))
            }
            OutputType::Classification => {
                let mut counts: Vec<(usize, usize)> = Vec::new();
                for &label in labels {
                    let class = head.class_of(label);
                    match counts.iter_mut().find(|(c, _)| *c == class) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((class, 1)),
                    }
                }

                let mut best = counts[0];
                for &entry in &counts[1..] {
                    if entry.1 > best.1 {
                        best = entry;
                    }
                }
                Ok(AverageLabel::Mode(best.0))
            }
        }
    }

    /// The label as a scalar
    pub fn value(&self) -> f32 {
        match self {
            AverageLabel::Mean(mean) => *mean,
            AverageLabel::Mode(class) => *class as f32,
        }
    }

    /// One output row: the mean itself, or a one-hot row of the mode class
    fn row(&self, width: usize) -> Vec<f32> {
        match self {
            AverageLabel::Mean(mean) => vec![*mean; width],
            AverageLabel::Mode(class) => (0..width)
                .map(|i| if i == *class { 1.0 } else { 0.0 })
                .collect(),
        }
    }
}

/// Raw outputs of one batch, shaped for the loss criterion
#[derive(Debug, Clone)]
pub enum RawOutputs<B: Backend> {
    /// Shape [batch_size]
    Regression(Tensor<B, 1>),
    /// Shape [batch_size, n_classes]; logits, one-hot rows or probabilities
    Classification(Tensor<B, 2>),
}

impl<B: Backend> RawOutputs<B> {
    /// Per-sample output rows on the host
    pub fn rows(&self) -> Result<Vec<Vec<f32>>> {
        match self {
            RawOutputs::Regression(scores) => Ok(float_values(scores.clone())?
                .into_iter()
                .map(|v| vec![v])
                .collect()),
            RawOutputs::Classification(logits) => {
                let [_, width] = logits.dims();
                let values = float_values(logits.clone())?;
                Ok(values.chunks(width.max(1)).map(<[f32]>::to_vec).collect())
            }
        }
    }
}

/// Raw outputs plus the discretised prediction of every sample
#[derive(Debug, Clone)]
pub struct ModelOutputs<B: Backend> {
    pub raw: RawOutputs<B>,
    pub predictions: Vec<f32>,
}

impl<B: Backend> ModelOutputs<B> {
    /// Squeeze `[batch_size, width]` outputs and derive predictions:
    /// argmax for classification, clamp into [0, 1] for regression
    pub fn from_raw(head: Head, raw: Tensor<B, 2>) -> Result<Self> {
        let [batch_size, width] = raw.dims();
        if width != head.output_width() {
            return Err(SiameseError::Model(format!(
                "expected {} outputs per sample, got {}",
                head.output_width(),
                width
            )));
        }

        match head.output_type {
            OutputType::Regression => {
                let scores = raw.reshape([batch_size]);
                let predictions = float_values(scores.clone().clamp(0.0, 1.0))?;
                Ok(Self {
                    raw: RawOutputs::Regression(scores),
                    predictions,
                })
            }
            OutputType::Classification => {
                let classes = int_values(raw.clone().argmax(1).reshape([batch_size]))?;
                Ok(Self {
                    raw: RawOutputs::Classification(raw),
                    predictions: classes.into_iter().map(|c| c as f32).collect(),
                })
            }
        }
    }
}

/// Rule producing outputs for a batch of image pairs
#[derive(Debug, Clone)]
pub enum OutputStrategy<B: Backend> {
    /// Trained network, raw outputs as they come
    Learned(SiameseNetwork<B>),
    /// Uniform [0, 1) noise
    Random,
    /// Training-split average broadcast to the batch
    Average(AverageLabel),
    /// Softmax over the network's class logits
    Probability(SiameseNetwork<B>),
}

impl<B: Backend> OutputStrategy<B> {
    /// Build the strategy for a model type.
    ///
    /// `training_labels` is only read by the `average` model.
    pub fn new(
        model_type: ModelType,
        head: Head,
        device: &B::Device,
        training_labels: Option<&[f32]>,
    ) -> Result<Self> {
        let network = || {
            SiameseNetworkConfig::for_model(model_type, head)
                .map(|config| config.init::<B>(device))
                .ok_or_else(|| {
                    SiameseError::Config(format!("model type '{}' has no network", model_type))
                })
        };

        match (model_type, head.output_type) {
            (ModelType::Probability, OutputType::Regression) => Err(SiameseError::Config(
                "model type 'probability' cannot be combined with regression output".to_string(),
            )),
            (ModelType::Probability, OutputType::Classification) => {
                Ok(OutputStrategy::Probability(network()?))
            }
            (ModelType::Heavy | ModelType::Light, _) => Ok(OutputStrategy::Learned(network()?)),
            (ModelType::Random, _) => Ok(OutputStrategy::Random),
            (ModelType::Average, _) => {
                let labels = training_labels.ok_or_else(|| {
                    SiameseError::Config(
                        "model type 'average' needs the training labels".to_string(),
                    )
                })?;
                Ok(OutputStrategy::Average(AverageLabel::from_labels(head, labels)?))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputStrategy::Learned(_) => "learned",
            OutputStrategy::Random => "random",
            OutputStrategy::Average(_) => "average",
            OutputStrategy::Probability(_) => "probability",
        }
    }

    pub fn network(&self) -> Option<&SiameseNetwork<B>> {
        match self {
            OutputStrategy::Learned(network) | OutputStrategy::Probability(network) => {
                Some(network)
            }
            OutputStrategy::Random | OutputStrategy::Average(_) => None,
        }
    }

    /// Swap in updated or restored weights; no-op for statistical strategies
    pub fn replace_network(&mut self, updated: SiameseNetwork<B>) {
        if let OutputStrategy::Learned(network) | OutputStrategy::Probability(network) = self {
            *network = updated;
        }
    }

    /// Recompute the average from the training split; no-op for other strategies
    pub fn refresh_average(&mut self, head: Head, training_labels: &[f32]) -> Result<()> {
        if let OutputStrategy::Average(label) = self {
            *label = AverageLabel::from_labels(head, training_labels)?;
        }
        Ok(())
    }

    /// Produce raw outputs and predictions for one batch
    pub fn outputs(
        &self,
        head: Head,
        image1: Tensor<B, 4>,
        image2: Tensor<B, 4>,
        rng: &mut ChaCha8Rng,
    ) -> Result<ModelOutputs<B>> {
        let [batch_size, _, _, _] = image1.dims();
        let width = head.output_width();
        let device = image1.device();

        let raw = match self {
            OutputStrategy::Learned(network) => network.forward(image1, image2),
            OutputStrategy::Random => {
                let values: Vec<f32> = (0..batch_size * width).map(|_| rng.gen::<f32>()).collect();
                Tensor::from_data(TensorData::new(values, [batch_size, width]), &device)
            }
            OutputStrategy::Average(label) => {
                let values = label.row(width).repeat(batch_size);
                Tensor::from_data(TensorData::new(values, [batch_size, width]), &device)
            }
            OutputStrategy::Probability(network) => softmax(network.forward(image1, image2), 1),
        };

        ModelOutputs::from_raw(head, raw)
    }
}

impl<B: AutodiffBackend> OutputStrategy<B> {
    /// Same strategy on the inner backend: no dropout, no gradient tape
    pub fn valid(&self) -> OutputStrategy<B::InnerBackend> {
        match self {
            OutputStrategy::Learned(network) => OutputStrategy::Learned(network.valid()),
            OutputStrategy::Random => OutputStrategy::Random,
            OutputStrategy::Average(label) => OutputStrategy::Average(*label),
            OutputStrategy::Probability(network) => OutputStrategy::Probability(network.valid()),
        }
    }
}

pub(crate) fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SiameseError::Tensor(format!("{:?}", e)))
}

pub(crate) fn int_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>,
) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| SiameseError::Tensor(format!("{:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    fn images(batch_size: usize) -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 4>) {
        let device = Default::default();
        (
            Tensor::random(
                [batch_size, 3, 16, 16],
                burn::tensor::Distribution::Default,
                &device,
            ),
            Tensor::random(
                [batch_size, 3, 16, 16],
                burn::tensor::Distribution::Default,
                &device,
            ),
        )
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn test_average_mean_for_regression() {
        let head = Head::new(OutputType::Regression, 4);
        let label = AverageLabel::from_labels(head, &[1.0, 1.0, 1.0, 2.0, 3.0]).unwrap();
        assert!((label.value() - 1.6).abs() < 1e-6);

        let strategy = OutputStrategy::<TestBackend>::Average(label);
        let (a, b) = images(3);
        let outputs = strategy.outputs(head, a, b, &mut rng()).unwrap();

        // Raw baseline keeps the unclamped mean; predictions go through the clamp
        for row in outputs.raw.rows().unwrap() {
            assert!((row[0] - 1.6).abs() < 1e-6);
        }
        assert_eq!(outputs.predictions, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_average_mode_for_classification() {
        let head = Head::new(OutputType::Classification, 4);
        let label = AverageLabel::from_labels(head, &[0.0, 0.0, 1.0, 2.0]).unwrap();
        assert_eq!(label, AverageLabel::Mode(0));

        let strategy = OutputStrategy::<TestBackend>::Average(label);
        let (a, b) = images(2);
        let outputs = strategy.outputs(head, a, b, &mut rng()).unwrap();

        assert_eq!(outputs.predictions, vec![0.0, 0.0]);
        assert_eq!(outputs.raw.rows().unwrap()[1], vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mode_tie_goes_to_first_seen() {
        let head = Head::new(OutputType::Classification, 4);
        let label = AverageLabel::from_labels(head, &[2.0, 1.0, 1.0, 2.0]).unwrap();
        assert_eq!(label, AverageLabel::Mode(2));
    }

    #[test]
    fn test_average_of_empty_split_fails() {
        let head = Head::new(OutputType::Regression, 4);
        assert!(AverageLabel::from_labels(head, &[]).is_err());
    }

    #[test]
    fn test_regression_predictions_are_clamped() {
        let device = Default::default();
        let head = Head::new(OutputType::Regression, 4);
        let raw = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.4f32, -0.3, 0.25], [3, 1]),
            &device,
        );

        let outputs = ModelOutputs::from_raw(head, raw).unwrap();
        assert_eq!(outputs.predictions, vec![1.0, 0.0, 0.25]);
        match outputs.raw {
            RawOutputs::Regression(scores) => assert_eq!(scores.dims(), [3]),
            RawOutputs::Classification(_) => panic!("regression outputs expected"),
        }
    }

    #[test]
    fn test_classification_predictions_are_argmax() {
        let device = Default::default();
        let head = Head::new(OutputType::Classification, 3);
        let raw = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.1f32, 2.0, -1.0, 3.0, 0.0, 0.5], [2, 3]),
            &device,
        );

        let outputs = ModelOutputs::from_raw(head, raw).unwrap();
        assert_eq!(outputs.predictions, vec![1.0, 0.0]);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let device = Default::default();
        let head = Head::new(OutputType::Classification, 4);
        let raw = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        assert!(ModelOutputs::from_raw(head, raw).is_err());
    }

    #[test]
    fn test_probability_rows_sum_to_one() {
        let device = Default::default();
        let head = Head::new(OutputType::Classification, 4);
        let strategy =
            OutputStrategy::<TestBackend>::new(ModelType::Probability, head, &device, None)
                .unwrap();

        let (a, b) = images(2);
        let outputs = strategy.outputs(head, a, b, &mut rng()).unwrap();
        let rows = outputs.raw.rows().unwrap();

        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.len(), 4);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_random_outputs_are_seeded() {
        let head = Head::new(OutputType::Classification, 4);
        let strategy = OutputStrategy::<TestBackend>::Random;
        let (a, b) = images(5);

        let first = strategy.outputs(head, a.clone(), b.clone(), &mut rng()).unwrap();
        let second = strategy.outputs(head, a, b, &mut rng()).unwrap();

        let rows = first.raw.rows().unwrap();
        assert_eq!(rows, second.raw.rows().unwrap());
        assert!(rows.iter().flatten().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_invalid_combinations_fail_at_construction() {
        let device = Default::default();
        let regression = Head::new(OutputType::Regression, 4);

        let err =
            OutputStrategy::<TestBackend>::new(ModelType::Probability, regression, &device, None)
                .unwrap_err();
        assert!(matches!(err, SiameseError::Config(_)));

        let err = OutputStrategy::<TestBackend>::new(ModelType::Average, regression, &device, None)
            .unwrap_err();
        assert!(matches!(err, SiameseError::Config(_)));
    }

    #[test]
    fn test_valid_keeps_variant_and_weights_shape() {
        let device = Default::default();
        let head = Head::new(OutputType::Classification, 4);
        let strategy =
            OutputStrategy::<Autodiff<TestBackend>>::new(ModelType::Light, head, &device, None)
                .unwrap();

        let inner = strategy.valid();
        assert_eq!(inner.name(), "learned");
        assert!(inner.network().is_some());

        let (a, b) = images(2);
        let first = inner.outputs(head, a.clone(), b.clone(), &mut rng()).unwrap();
        let second = inner.outputs(head, a, b, &mut rng()).unwrap();
        // Evaluation is deterministic for fixed weights and inputs
        assert_eq!(first.raw.rows().unwrap(), second.raw.rows().unwrap());
    }
}
