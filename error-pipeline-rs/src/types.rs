//! # Failure Events
//!
//! Records produced by the failure channels and consumed by the pipeline.

use chrono::{DateTime, Utc};

use crate::exception::ExceptionHandle;
use crate::severity::SeverityCode;

/// A single failure, built by whichever channel fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub severity_code: SeverityCode,
    pub message: String,
    pub file: String,
    pub line: Option<u32>,
    /// Application code carried verbatim to the destination
    pub app_code: Option<i64>,
    pub exception: Option<ExceptionHandle>,
}

impl ErrorEvent {
    pub fn new(
        severity_code: SeverityCode,
        message: impl Into<String>,
        file: impl Into<String>,
        line: impl Into<Option<u32>>,
    ) -> Self {
        Self {
            severity_code,
            message: message.into(),
            file: file.into(),
            line: line.into(),
            app_code: None,
            exception: None,
        }
    }

    pub fn app_code(mut self, code: Option<i64>) -> Self {
        self.app_code = code;
        self
    }

    pub fn exception(mut self, exception: ExceptionHandle) -> Self {
        self.exception = Some(exception);
        self
    }
}

/// The runtime's record of the most recent raised error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub severity_code: SeverityCode,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub recorded_at: DateTime<Utc>,
}

impl LastError {
    pub fn new(severity_code: SeverityCode, message: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            severity_code,
            message: message.into(),
            file: file.into(),
            line,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::code;

    #[test]
    fn test_event_builder() {
        let exception = ExceptionHandle::new("boom", "src/main.rs", 9);
        let event = ErrorEvent::new(code::E_ERROR, "boom", "src/main.rs", 9)
            .app_code(Some(500))
            .exception(exception.clone());

        assert_eq!(event.severity_code, code::E_ERROR);
        assert_eq!(event.line, Some(9));
        assert_eq!(event.app_code, Some(500));
        assert_eq!(event.exception, Some(exception));

        let unknown_line = ErrorEvent::new(code::E_ERROR, "boom", "unknown file", None);
        assert_eq!(unknown_line.line, None);
    }

    #[test]
    fn test_last_error_timestamp() {
        let before = Utc::now();
        let last = LastError::new(code::E_PARSE, "syntax error", "config.toml", 4);
        assert!(last.recorded_at >= before);
        assert_eq!(last.line, 4);
    }
}
