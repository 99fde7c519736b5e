//! Error type for the pipeline's configuration and delivery surfaces.
//!
//! The reporting path itself never returns errors: unreadable files, missing
//! frames and failed deliveries all degrade to placeholder text or a log line.
//! `PipelineError` only surfaces from set-up (configuration, logging) and
//! from the outbound channel.

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Structured logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// The outbound channel could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The chat endpoint answered with an API-level error
    #[error("Delivery rejected ({code}): {message}")]
    Delivery { code: i64, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        PipelineError::Transport(message.into())
    }

    /// Returns true if a later attempt could plausibly succeed.
    ///
    /// The pipeline never retries on its own; this is for callers wrapping a
    /// channel in their own delivery policy.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Transport(_) => true,
            PipelineError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map_or(false, |s| s.as_u16() >= 500)
            }
            _ => false,
        }
    }
}
