//! # Error Pipeline
//!
//! Intercepts every failure a process can raise (non-fatal errors, panics and
//! uncaught exceptions, terminal conditions seen at shutdown) and turns each
//! one into a single human-readable report, delivered either to a developer
//! callback or as a chat message to a fixed list of recipients.
//!
//! ## Features
//!
//! - Severity classification with labelled tiers
//! - Annotated stack traces with one-line source snippets
//! - Path redaction and chat-friendly text normalization
//! - Exactly one dispatch per failure
//! - Local suppression with [`silence`]
//!
//! ```no_run
//! use error_pipeline::{DispatchTarget, ErrorPipeline, ProcessRuntime};
//!
//! let runtime = ProcessRuntime::new();
//! let _pipeline = ErrorPipeline::builder(DispatchTarget::callback(|report| {
//!     eprintln!("[{}] {}", report.category, report.text);
//! }))
//! .path_filters(["/srv/app"])
//! .install(&runtime);
//! let _guard = runtime.shutdown_guard();
//! ```

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod logging;
pub mod normalize;
pub mod path_filter;
pub mod pipeline;
pub mod runtime;
pub mod severity;
pub mod snippet;
pub mod trace;
pub mod transport;
pub mod types;

use std::sync::Arc;

// Re-export commonly used types
pub use crate::builder::PipelineBuilder;
pub use crate::config::{load_config, NotifyConfig, PipelineConfig};
pub use crate::dispatch::{DispatchTarget, NotificationChannel, OutboundMessage, Report};
pub use crate::error::{PipelineError, Result};
pub use crate::exception::{ExceptionHandle, RawFrame};
pub use crate::logging::{init_logging, LoggingConfig};
pub use crate::normalize::normalize;
pub use crate::pipeline::ErrorPipeline;
pub use crate::runtime::{silence, HostRuntime, ProcessRuntime, ReportingMask};
pub use crate::severity::{classify, SeverityCode, Tier};
pub use crate::transport::ChatApiChannel;
pub use crate::types::{ErrorEvent, LastError};

/// Initializes pipeline diagnostics with default settings
pub fn init() -> Result<()> {
    init_logging(None)
}

/// Initializes logging from `config` and installs a chat-notifying pipeline
/// on `runtime`
pub fn init_with_config(config: &PipelineConfig, runtime: &dyn HostRuntime) -> Result<Arc<ErrorPipeline>> {
    init_logging(Some(config.logging.clone()))?;

    let target = config.into_target()?;
    Ok(ErrorPipeline::builder(target)
        .path_filters(config.path_filters.iter().cloned())
        .snippet_padding(config.snippet_padding)
        .install(runtime))
}
