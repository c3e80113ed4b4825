//! Logging Module
//!
//! Structured logging with the `tracing` crate. The binary installs one
//! subscriber with a stdout layer and an optional plain-text file layer;
//! library code only emits events and carries an [`Observer`] span.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{info_span, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::utils::error::{Result, SiameseError};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Debug level instead of info
    pub verbose: bool,
    /// Whether to use ANSI colors on stdout
    pub ansi_colors: bool,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Plain-text copy of the log, appended to
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            ansi_colors: true,
            include_target: false,
            log_file: None,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            include_target: true,
            ..Self::default()
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Filter used when `RUST_LOG` is not set
    fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Install the global subscriber; fails if one is already set
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let stdout = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact();

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(config.include_target)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file_layer)
        .try_init()
        .map_err(|e| SiameseError::Config(format!("Failed to initialize logging: {}", e)))
}

/// Route panics through `tracing::error!` before the default hook runs
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        tracing::error!("panic at {}: {}", location, message);
        default_hook(info);
    }));
}

/// Observability handle passed down to the training code.
///
/// Wraps the span of one run; epochs open child spans so every event is
/// tagged with run, phase and epoch. A detached observer records nothing.
#[derive(Debug, Clone)]
pub struct Observer {
    span: Span,
}

impl Observer {
    pub fn for_run(run_name: &str) -> Self {
        Self {
            span: info_span!("run", name = %run_name),
        }
    }

    pub fn detached() -> Self {
        Self { span: Span::none() }
    }

    /// Child span for one pass over a split
    pub fn epoch_span(&self, phase: &str, epoch: usize) -> Span {
        info_span!(parent: &self.span, "epoch", phase = %phase, epoch)
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(LogConfig::default().default_directive(), "info");
        assert_eq!(LogConfig::verbose().default_directive(), "debug");
    }

    #[test]
    fn test_detached_observer_spans_are_disabled() {
        let observer = Observer::detached();
        assert!(observer.span().is_none());
        // Entering works even without a subscriber
        let span = observer.epoch_span("train", 1);
        let _guard = span.enter();
    }

    #[test]
    fn test_log_file_is_configured() {
        let config = LogConfig::default().with_log_file("runs/a/run.log");
        assert_eq!(config.log_file, Some(PathBuf::from("runs/a/run.log")));
        assert!(!config.verbose);
    }
}
