//! # Structured Logging
//!
//! Diagnostics about the pipeline itself: installs, dispatches, delivery
//! failures. Reports are never routed through here.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::error::{PipelineError, Result};

// Set once a global subscriber has been installed by this module
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Name used for the log file
    pub service_name: String,
    /// Whether to also write logs to a daily rolling file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "error-pipeline".to_string(),
            file_output: false,
            log_dir: None,
            json_format: true,
        }
    }
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub fn default_directive(&self) -> String {
        format!("{},warn", self.level)
    }
}

/// Initializes structured logging. Calls after the first one are no-ops.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.default_directive()));
    let subscriber = Registry::default().with(filter);

    // JSON and text layers have different concrete types, so each arm builds
    // its own subscriber.
    let (json_layer, text_layer) = if config.json_format {
        let layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true);
        (Some(layer), None)
    } else {
        let layer = fmt::layer().with_target(true).with_thread_names(true);
        (None, Some(layer))
    };
    let subscriber = subscriber.with(json_layer).with(text_layer);

    let file_layer = match (&config.file_output, &config.log_dir) {
        (true, Some(log_dir)) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, format!("{}.log", config.service_name));
            let (writer, guard) = NonBlocking::new(appender);

            // Flushes on drop; must outlive every log call.
            Box::leak(Box::new(guard));

            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        (true, None) => {
            return Err(PipelineError::Logging(
                "file output requested without a log directory".to_string(),
            ))
        }
        _ => None,
    };
    let subscriber = subscriber.with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PipelineError::Logging(format!("Failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Returns true once [`init_logging`] has installed a subscriber
pub fn is_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }

        Ok(base)
    }
}
