//! Utilities module for logging, metrics, and helper functions
//!
//! This module provides:
//! - Structured logging with tracing and the run [`Observer`]
//! - Scores over a confusion matrix (micro, macro and weighted averages)
//! - Error handling types
//! - Scalar metric sinks (TensorBoard event files)
//! - Formatting helpers for the run report

pub mod error;
pub mod logging;
pub mod metrics;
pub mod tensorboard;

use chrono::{DateTime, Utc};

// Re-export main types for convenience
pub use error::{Result, ResultExt, SiameseError};
pub use logging::{init_logging, install_panic_hook, LogConfig, Observer};
pub use metrics::{ConfusionMatrix, Score, SelectionMetric};
pub use tensorboard::{MemorySink, MetricsSink, NullSink, TensorBoardWriter};

/// Format a duration as `"{minutes}m {seconds}s"`
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}m {}s", total / 60, total % 60)
}

/// Round to 4 decimals for the run report
pub fn readable_float(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// ISO-8601 timestamp without fractional seconds
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Current UTC time as written to the run report
pub fn utc_timestamp() -> String {
    format_timestamp(Utc::now())
}
