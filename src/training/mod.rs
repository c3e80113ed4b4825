//! Training module for the quasi-siamese damage model
//!
//! This module provides:
//! - Output strategies for learned networks and statistical baselines
//! - The epoch runner (one pass over a split, with prediction files)
//! - Rolling evaluation of loss and scores
//! - Reduce-on-plateau learning rate scheduling
//! - Best-model checkpointing and the run report
//! - The train/test/inference orchestrator
//!
//! ## Checkpointing
//!
//! The best validation score starts at 0.0 and only a strictly higher score
//! overwrites the checkpoint, so a run whose validation score never rises
//! above zero leaves no checkpoint behind.

pub mod checkpoint;
pub mod epoch;
pub mod evaluator;
pub mod report;
pub mod scheduler;
pub mod strategy;
pub mod trainer;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export main types for convenience
pub use checkpoint::{load_weights, save_weights, BestScoreTracker};
pub use epoch::{prediction_file_name, Criterion, EpochOutcome, EpochRunner};
pub use evaluator::RollingEvaluator;
pub use report::{ModelKind, RunReport, TestSummary, TrainingSummary};
pub use scheduler::{PlateauConfig, ReduceLrOnPlateau};
pub use strategy::{AverageLabel, ModelOutputs, OutputStrategy, RawOutputs};
pub use trainer::QuasiSiameseNetwork;
