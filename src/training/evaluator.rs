//! Rolling evaluation over the batches of one epoch.
//!
//! Only the confusion counts, the loss sum and the sample count are kept, so
//! an epoch of any size is scored without holding its batches in memory.
//! Totals depend on the samples seen, never on how they were batched.

use crate::config::{Head, OutputType};
use crate::utils::metrics::{ConfusionMatrix, Score};

/// Streaming accumulator of loss and confusion counts
#[derive(Debug, Clone)]
pub struct RollingEvaluator {
    head: Head,
    loss_sum: f64,
    count: usize,
    confusion: ConfusionMatrix,
    squared_error: f64,
}

impl RollingEvaluator {
    pub fn new(head: Head) -> Self {
        Self {
            head,
            loss_sum: 0.0,
            count: 0,
            confusion: ConfusionMatrix::new(head.n_classes),
            squared_error: 0.0,
        }
    }

    /// Ingest one batch and return the score of that batch alone.
    ///
    /// `batch_loss` is the mean loss over the batch; it is weighted by the
    /// batch length so the epoch loss is a per-sample mean.
    pub fn add(&mut self, labels: &[f32], predictions: &[f32], batch_loss: f64) -> Score {
        debug_assert_eq!(labels.len(), predictions.len());

        let mut batch = ConfusionMatrix::new(self.head.n_classes);
        for (&label, &prediction) in labels.iter().zip(predictions) {
            batch.add(self.head.class_of(label), self.head.class_of(prediction));
            if self.head.output_type == OutputType::Regression {
                let diff = f64::from(prediction) - f64::from(label);
                self.squared_error += diff * diff;
            }
        }

        let len = labels.len().min(predictions.len());
        self.loss_sum += batch_loss * len as f64;
        self.count += len;
        self.confusion.merge(&batch);

        Score::from_confusion(&batch)
    }

    /// Sample-weighted mean loss so far
    pub fn loss(&self) -> f64 {
        if self.count > 0 {
            self.loss_sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Score over every sample seen so far
    pub fn score(&self) -> Score {
        Score::from_confusion(&self.confusion)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    /// Mean squared error of the predictions, regression only
    pub fn mean_squared_error(&self) -> Option<f64> {
        match self.head.output_type {
            OutputType::Regression if self.count > 0 => {
                Some(self.squared_error / self.count as f64)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification() -> Head {
        Head::new(OutputType::Classification, 3)
    }

    #[test]
    fn test_batch_size_invariance() {
        let labels = [0.0, 1.0, 1.0, 2.0, 0.0, 2.0, 1.0];
        let predictions = [0.0, 1.0, 2.0, 2.0, 1.0, 2.0, 1.0];
        let per_sample_loss = [0.2, 0.4, 1.3, 0.1, 0.9, 0.3, 0.5];

        let run = |sizes: &[usize]| {
            let mut evaluator = RollingEvaluator::new(classification());
            let mut start = 0;
            for &size in sizes {
                let end = start + size;
                let batch_loss = per_sample_loss[start..end].iter().sum::<f64>() / size as f64;
                evaluator.add(&labels[start..end], &predictions[start..end], batch_loss);
                start = end;
            }
            (evaluator.loss(), evaluator.score())
        };

        let (loss_a, score_a) = run(&[7]);
        let (loss_b, score_b) = run(&[1, 6]);
        let (loss_c, score_c) = run(&[3, 3, 1]);

        let expected = per_sample_loss.iter().sum::<f64>() / 7.0;
        for loss in [loss_a, loss_b, loss_c] {
            assert!((loss - expected).abs() < 1e-12);
        }
        assert_eq!(score_a, score_b);
        assert_eq!(score_a, score_c);
    }

    #[test]
    fn test_small_batch_does_not_skew_loss() {
        let mut evaluator = RollingEvaluator::new(classification());
        evaluator.add(&[0.0; 9], &[0.0; 9], 1.0);
        evaluator.add(&[0.0], &[0.0], 11.0);
        // (9 * 1 + 1 * 11) / 10, not (1 + 11) / 2
        assert!((evaluator.loss() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_add_returns_batch_local_score() {
        let mut evaluator = RollingEvaluator::new(classification());
        let first = evaluator.add(&[0.0, 1.0], &[0.0, 1.0], 0.1);
        let second = evaluator.add(&[1.0, 2.0], &[2.0, 2.0], 0.1);

        assert_eq!(first.accuracy, 1.0);
        assert_eq!(second.accuracy, 0.5);
        assert_eq!(evaluator.score().correct, 3);
        assert_eq!(evaluator.score().total, 4);
        assert!((evaluator.score().accuracy - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_regression_discretises_before_scoring() {
        let mut evaluator = RollingEvaluator::new(Head::new(OutputType::Regression, 4));
        // 0.30 and 0.35 share level 1; 1.0 is level 3 while 0.6 is level 2
        evaluator.add(&[0.30, 1.0], &[0.35, 0.6], 0.05);

        let score = evaluator.score();
        assert_eq!(score.correct, 1);
        assert_eq!(score.total, 2);

        let mse = evaluator.mean_squared_error().unwrap();
        let expected = ((0.05f64).powi(2) + (0.4f64).powi(2)) / 2.0;
        assert!((mse - expected).abs() < 1e-6);
    }

    #[test]
    fn test_empty_evaluator() {
        let evaluator = RollingEvaluator::new(classification());
        assert_eq!(evaluator.loss(), 0.0);
        assert_eq!(evaluator.count(), 0);
        assert_eq!(evaluator.score().total, 0);
        assert!(evaluator.mean_squared_error().is_none());
    }
}
