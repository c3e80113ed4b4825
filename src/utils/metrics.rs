//! Metrics Module for Model Evaluation
//!
//! Confusion-matrix based scoring shared by every phase:
//! - Accuracy and correct/total counts
//! - Precision, recall and F1 under micro, macro and weighted averaging
//! - Selection of one scalar (e.g. `recall_micro`) for model comparison
//!
//! Classes with no true or no predicted members score 0 instead of failing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::SiameseError;

/// Precision, recall and F1 under one averaging scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecallF1 {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl PrecisionRecallF1 {
    fn get(&self, measure: Measure) -> f64 {
        match measure {
            Measure::Precision => self.precision,
            Measure::Recall => self.recall,
            Measure::F1 => self.f1,
        }
    }
}

/// Score tuple produced for a batch or for everything seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
    pub micro: PrecisionRecallF1,
    pub macro_avg: PrecisionRecallF1,
    pub weighted: PrecisionRecallF1,
}

impl Score {
    /// Compute the full score tuple from a confusion matrix
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let total = cm.total();
        let correct = cm.correct();
        let per_class: Vec<ClassMetrics> = (0..cm.num_classes)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(cm, class_idx))
            .collect();

        // Micro: pool the counts of every class before dividing
        let tp: usize = per_class.iter().map(|m| m.true_positives).sum();
        let fp: usize = per_class.iter().map(|m| m.false_positives).sum();
        let fn_: usize = per_class.iter().map(|m| m.false_negatives).sum();
        let micro = prf(ratio(tp, tp + fp), ratio(tp, tp + fn_));

        // Macro: classes that appear in either the truth or the predictions
        let observed: Vec<&ClassMetrics> = per_class
            .iter()
            .filter(|m| m.support > 0 || m.true_positives + m.false_positives > 0)
            .collect();
        let macro_avg = if observed.is_empty() {
            PrecisionRecallF1::default()
        } else {
            let n = observed.len() as f64;
            PrecisionRecallF1 {
                precision: observed.iter().map(|m| m.precision).sum::<f64>() / n,
                recall: observed.iter().map(|m| m.recall).sum::<f64>() / n,
                f1: observed.iter().map(|m| m.f1).sum::<f64>() / n,
            }
        };

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted = if total_support == 0 {
            PrecisionRecallF1::default()
        } else {
            let weigh = |f: fn(&ClassMetrics) -> f64| {
                per_class
                    .iter()
                    .map(|m| f(m) * m.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            };
            PrecisionRecallF1 {
                precision: weigh(|m| m.precision),
                recall: weigh(|m| m.recall),
                f1: weigh(|m| m.f1),
            }
        };

        Self {
            accuracy: cm.accuracy(),
            correct,
            total,
            micro,
            macro_avg,
            weighted,
        }
    }

    /// Pick the scalar named by a selection metric
    pub fn select(&self, metric: SelectionMetric) -> f64 {
        let averaged = match metric.average {
            Average::Micro => &self.micro,
            Average::Macro => &self.macro_avg,
            Average::Weighted => &self.weighted,
        };
        averaged.get(metric.measure)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

fn prf(precision: f64, recall: f64) -> PrecisionRecallF1 {
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    PrecisionRecallF1 {
        precision,
        recall,
        f1,
    }
}

/// Which of precision, recall or F1 to select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    Precision,
    Recall,
    F1,
}

/// Which averaging scheme to select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    Micro,
    Macro,
    Weighted,
}

impl Measure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::Precision => "precision",
            Measure::Recall => "recall",
            Measure::F1 => "f1",
        }
    }
}

impl Average {
    pub fn as_str(&self) -> &'static str {
        match self {
            Average::Micro => "micro",
            Average::Macro => "macro",
            Average::Weighted => "weighted",
        }
    }
}

/// Selection metric written as `{precision|recall|f1}_{micro|macro|weighted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SelectionMetric {
    pub measure: Measure,
    pub average: Average,
}

impl Default for SelectionMetric {
    fn default() -> Self {
        Self {
            measure: Measure::Recall,
            average: Average::Micro,
        }
    }
}

impl FromStr for SelectionMetric {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            SiameseError::Config(format!(
                "invalid selection metric '{}', expected {{precision|recall|f1}}_{{micro|macro|weighted}}",
                s
            ))
        };
        let (measure, average) = s.split_once('_').ok_or_else(invalid)?;
        let measure = match measure {
            "precision" => Measure::Precision,
            "recall" => Measure::Recall,
            "f1" => Measure::F1,
            _ => return Err(invalid()),
        };
        let average = match average {
            "micro" => Average::Micro,
            "macro" => Average::Macro,
            "weighted" => Average::Weighted,
            _ => return Err(invalid()),
        };
        Ok(Self { measure, average })
    }
}

impl TryFrom<String> for SelectionMetric {
    type Error = SiameseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SelectionMetric> for String {
    fn from(metric: SelectionMetric) -> Self {
        metric.to_string()
    }
}

impl fmt::Display for SelectionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.measure.as_str(), self.average.as_str())
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,

    /// Precision = TP / (TP + FP)
    pub precision: f64,

    /// Recall = TP / (TP + FN)
    pub recall: f64,

    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,

    /// Support = number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        // Predicted as this class but actually another
        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        // Actually this class but predicted as another
        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let PrecisionRecallF1 {
            precision,
            recall,
            f1,
        } = prf(
            ratio(true_positives, true_positives + false_positives),
            ratio(true_positives, true_positives + false_negatives),
        );

        Self {
            class_idx,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted)
    /// Stored as a flat vector in row-major order
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Add every cell of another matrix of the same size
    pub fn merge(&mut self, other: &ConfusionMatrix) {
        debug_assert_eq!(self.num_classes, other.num_classes);
        for (cell, count) in self.matrix.iter_mut().zip(other.matrix.iter()) {
            *cell += count;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Get overall accuracy
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Confusion Matrix (rows=actual, cols=predicted):")?;
        write!(f, "        ")?;
        for col in 0..self.num_classes {
            write!(f, "{:>6}", col)?;
        }
        writeln!(f)?;
        for row in 0..self.num_classes {
            write!(f, "{:>6}  ", row)?;
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    write!(f, "[{:>4}]", count)?;
                } else if count > 0 {
                    write!(f, " {:>4} ", count)?;
                } else {
                    write!(f, "    . ")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_of(ground_truth: &[usize], predictions: &[usize], num_classes: usize) -> Score {
        Score::from_confusion(&ConfusionMatrix::from_predictions(
            predictions,
            ground_truth,
            num_classes,
        ))
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_merge_adds_cells() {
        let mut a = ConfusionMatrix::from_predictions(&[0, 1], &[0, 0], 2);
        let b = ConfusionMatrix::from_predictions(&[1], &[1], 2);
        a.merge(&b);
        assert_eq!(a.matrix, vec![1, 1, 0, 1]);
    }

    #[test]
    fn test_micro_matches_pooled_counts() {
        // true=[0,1,1,2], pred=[0,1,2,2]
        let score = score_of(&[0, 1, 1, 2], &[0, 1, 2, 2], 3);

        assert_eq!(score.correct, 3);
        assert_eq!(score.total, 4);
        assert!((score.accuracy - 0.75).abs() < 1e-9);

        // Pooled TP=3, FP=1, FN=1
        assert!((score.micro.precision - 3.0 / 4.0).abs() < 1e-9);
        assert!((score.micro.recall - 3.0 / 4.0).abs() < 1e-9);
        assert!((score.micro.f1 - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_macro_and_weighted_differ_from_micro_when_imbalanced() {
        // Six samples of class 0, one of class 1, two of class 2
        let truth = [0, 0, 0, 0, 0, 0, 1, 2, 2];
        let preds = [0, 0, 0, 0, 0, 1, 0, 2, 0];
        let score = score_of(&truth, &preds, 3);

        let cm = ConfusionMatrix::from_predictions(&preds, &truth, 3);
        let f1s: Vec<f64> = (0..3)
            .map(|c| ClassMetrics::from_confusion_matrix(&cm, c).f1)
            .collect();
        // class 0: P=5/7 R=5/6, class 1: P=0 R=0, class 2: P=1 R=1/2
        assert!((f1s[0] - 10.0 / 13.0).abs() < 1e-9);
        assert_eq!(f1s[1], 0.0);
        assert!((f1s[2] - 2.0 / 3.0).abs() < 1e-9);

        let macro_f1 = (f1s[0] + f1s[1] + f1s[2]) / 3.0;
        let weighted_f1 = (f1s[0] * 6.0 + f1s[1] + f1s[2] * 2.0) / 9.0;

        assert!((score.macro_avg.f1 - macro_f1).abs() < 1e-9);
        assert!((score.weighted.f1 - weighted_f1).abs() < 1e-9);
        assert!((score.micro.f1 - 6.0 / 9.0).abs() < 1e-9);
        assert!((score.macro_avg.f1 - score.micro.f1).abs() > 1e-3);
        assert!((score.weighted.f1 - score.micro.f1).abs() > 1e-3);
    }

    #[test]
    fn test_zero_member_class_scores_zero() {
        // Class 1 is never predicted, class 2 never occurs
        let cm = ConfusionMatrix::from_predictions(&[0, 0], &[0, 1], 3);
        let class1 = ClassMetrics::from_confusion_matrix(&cm, 1);
        let class2 = ClassMetrics::from_confusion_matrix(&cm, 2);

        assert_eq!(class1.precision, 0.0);
        assert_eq!(class1.recall, 0.0);
        assert_eq!(class2.f1, 0.0);

        // Class 2 is in neither truth nor predictions, so macro averages two classes
        let score = Score::from_confusion(&cm);
        assert!((score.macro_avg.recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_score_is_zero() {
        let score = Score::from_confusion(&ConfusionMatrix::new(4));
        assert_eq!(score, Score::default());
    }

    #[test]
    fn test_selection_metric_parse_and_select() {
        let metric: SelectionMetric = "f1_weighted".parse().unwrap();
        assert_eq!(metric.measure, Measure::F1);
        assert_eq!(metric.average, Average::Weighted);
        assert_eq!(metric.to_string(), "f1_weighted");

        let score = score_of(&[0, 1, 1, 2], &[0, 1, 2, 2], 3);
        assert_eq!(score.select(metric), score.weighted.f1);
        assert_eq!(score.select(SelectionMetric::default()), score.micro.recall);
    }

    #[test]
    fn test_selection_metric_rejects_unknown_strings() {
        for bad in ["recall", "accuracy_micro", "recall_mean", "", "f1_micro_extra"] {
            let err = bad.parse::<SelectionMetric>().unwrap_err();
            assert!(matches!(err, SiameseError::Config(_)), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_selection_metric_serde_as_string() {
        let json = serde_json::to_string(&SelectionMetric::default()).unwrap();
        assert_eq!(json, "\"recall_micro\"");
        let back: SelectionMetric = serde_json::from_str("\"precision_macro\"").unwrap();
        assert_eq!(back.average, Average::Macro);
        assert!(serde_json::from_str::<SelectionMetric>("\"bogus\"").is_err());
    }
}
