//! Error Handling Module
//!
//! Error type shared by the dataset, model and training layers.
//! Configuration problems are fatal at the point they are detected, resource
//! problems (missing checkpoints, unreadable images) are surfaced to the
//! caller, and nothing here is retried.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for quasi-siamese operations
#[derive(Error, Debug)]
pub enum SiameseError {
    /// Unknown model/output type, phase, selection metric or device,
    /// or an invalid combination of them
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reading a split directory or its labels
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Test or inference requested for a learned model without saved weights
    #[error("No checkpoint found at '{0}'")]
    CheckpointNotFound(PathBuf),

    /// Error saving or restoring model weights
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error with model outputs or losses
    #[error("Model error: {0}")]
    Model(String),

    /// Tensor data could not be read back to the host
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for SiameseError {
    fn from(err: serde_json::Error) -> Self {
        SiameseError::Serialization(err.to_string())
    }
}

/// Convenience Result type for quasi-siamese operations
pub type Result<T> = std::result::Result<T, SiameseError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| SiameseError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SiameseError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SiameseError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| SiameseError::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = SiameseError::Config("unknown phase 'dev'".to_string());
        assert_eq!(format!("{}", err), "Configuration error: unknown phase 'dev'");
    }

    #[test]
    fn test_checkpoint_not_found_mentions_path() {
        let err = SiameseError::CheckpointNotFound(PathBuf::from("/runs/a/best_model_wts.mpk"));
        assert!(format!("{}", err).contains("best_model_wts.mpk"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.context("Failed to read labels").unwrap_err();
        assert!(format!("{}", err).contains("Failed to read labels"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        assert!(opt.context("Value was None").is_err());
    }

    #[test]
    fn test_json_error_converts() {
        let err: SiameseError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, SiameseError::Serialization(_)));
    }
}
