//! # Error Pipeline
//!
//! Orchestrates classification, trace construction, normalization and
//! dispatch. Every failure channel ends in the same internal `report` step,
//! which dispatches exactly once per failure.
//!
//! All state lives in the pipeline instance: path filters, the dispatch
//! target, the snippet cache, the reporting mask handle and the
//! `exception_report_pending` flag. The flag is set while an uncaught
//! exception is being reported so the follow-up report does not repeat the
//! site and snippet already embedded in the trace.

use std::error::Error as StdError;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::builder::PipelineBuilder;
use crate::dispatch::{DispatchTarget, ReportDispatcher};
use crate::exception::ExceptionHandle;
use crate::normalize::normalize;
use crate::path_filter::PathFilter;
use crate::runtime::{HostRuntime, ReportingMask};
use crate::severity::{self, code, SeverityCode};
use crate::snippet::{SourceReader, SourceSnippetProvider};
use crate::trace::{TraceBuilder, APP_FRAME_MARKER};
use crate::types::{ErrorEvent, LastError};

/// Captures failures and turns each into one dispatched report
#[derive(Debug)]
pub struct ErrorPipeline {
    dispatcher: ReportDispatcher,
    paths: PathFilter,
    snippets: SourceSnippetProvider,
    snippet_padding: u32,
    mask: Arc<ReportingMask>,
    exception_report_pending: AtomicBool,
}

impl ErrorPipeline {
    pub fn builder(target: DispatchTarget) -> PipelineBuilder {
        PipelineBuilder::new(target)
    }

    /// Pipeline with default collaborators, not attached to any runtime
    pub fn new(target: DispatchTarget) -> Self {
        PipelineBuilder::new(target).build()
    }

    /// Installs a pipeline with default collaborators on `runtime`
    pub fn configure(target: DispatchTarget, runtime: &dyn HostRuntime) -> Arc<Self> {
        PipelineBuilder::new(target).install(runtime)
    }

    pub(crate) fn from_parts(
        target: DispatchTarget,
        path_filters: Vec<String>,
        source_reader: Box<dyn SourceReader>,
        snippet_padding: u32,
        mask: Arc<ReportingMask>,
    ) -> Self {
        Self {
            dispatcher: ReportDispatcher::new(target),
            paths: PathFilter::new(path_filters),
            snippets: SourceSnippetProvider::new(source_reader),
            snippet_padding,
            mask,
            exception_report_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn register(self: &Arc<Self>, runtime: &dyn HostRuntime) {
        self.mask.set(code::ALL);

        let pipeline = Arc::clone(self);
        runtime.set_error_handler(Arc::new(
            move |severity_code: SeverityCode, message: &str, file: &str, line: u32| {
                pipeline.on_non_fatal_error(severity_code, message, file, line)
            },
        ));

        let pipeline = Arc::clone(self);
        runtime.set_exception_handler(Arc::new(move |exception: ExceptionHandle| {
            pipeline.on_uncaught_exception(exception)
        }));

        let pipeline = Arc::clone(self);
        runtime.register_shutdown(Arc::new(move |last: Option<&LastError>| pipeline.on_shutdown(last)));

        tracing::info!(target_kind = ?self.dispatcher.target(), "Error pipeline installed");
    }

    /// Replaces the redacted path prefixes
    pub fn set_path_filters<I, S>(&self, filters: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.set_filters(filters);
    }

    /// Appends a redacted path prefix
    pub fn add_path_filter(&self, filter: impl Into<String>) {
        self.paths.add_filter(filter);
    }

    pub fn path_filters(&self) -> Vec<String> {
        self.paths.filters()
    }

    pub fn reporting_mask(&self) -> &ReportingMask {
        &self.mask
    }

    /// Non-fatal error channel
    pub fn on_non_fatal_error(&self, severity_code: SeverityCode, message: &str, file: &str, line: u32) {
        self.report(ErrorEvent::new(severity_code, message, file, line));
    }

    /// Uncaught-exception channel. The exception is reported as `E_ERROR`
    /// with its full annotated trace.
    pub fn on_uncaught_exception(&self, exception: ExceptionHandle) {
        self.exception_report_pending.store(true, Ordering::SeqCst);

        let message = normalize(&exception.message);
        let file = normalize(&exception.file);
        let trace = TraceBuilder::new(&self.snippets, &self.paths).render(&file, exception.line, &exception.frames);

        let event = ErrorEvent::new(code::E_ERROR, format!("{}\n\n{}", message, trace), file, exception.line)
            .app_code(exception.code)
            .exception(exception);
        self.report(event);
    }

    /// End-of-process scan. Reports the last recorded error if it belongs to
    /// the terminal class, which never reaches the non-fatal channel.
    pub fn on_shutdown(&self, last: Option<&LastError>) {
        let last = match last {
            Some(last) if severity::is_terminal(last.severity_code) => last,
            _ => return,
        };

        tracing::info!(
            severity_code = last.severity_code,
            file = %last.file,
            line = last.line,
            recorded_at = %last.recorded_at,
            "Reporting terminal condition found at shutdown"
        );
        self.on_non_fatal_error(last.severity_code, &last.message, &last.file, last.line);
    }

    /// Reports a caught error as if it had escaped, anchored at the caller
    #[track_caller]
    pub fn report_exception(&self, error: &(dyn StdError + 'static)) {
        self.on_uncaught_exception(ExceptionHandle::from_error(error));
    }

    fn report(&self, event: ErrorEvent) {
        if !self.mask.allows(event.severity_code) {
            tracing::trace!(severity_code = event.severity_code, "Report suppressed by reporting mask");
            return;
        }

        if !severity::is_recognized(event.severity_code) {
            tracing::warn!(severity_code = event.severity_code, "Reporting unrecognized severity code");
        }

        let info = severity::classify(event.severity_code);
        let already_traced = self.exception_report_pending.swap(false, Ordering::SeqCst);
        let prefix = info.tier.prefix();

        let text = if already_traced || event.exception.is_some() {
            format!("{} {}", prefix, event.message)
        } else {
            let line = event
                .line
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!(
                "{} {} ({} at line {})\n{}{}",
                prefix,
                event.message,
                self.paths.filter(&event.file),
                line,
                APP_FRAME_MARKER,
                self.snippets
                    .snippet(&event.file, event.line.unwrap_or(0), self.snippet_padding)
            )
        };

        self.dispatcher
            .dispatch(info.label, &text, event.app_code, event.exception.as_ref());

        if event.exception.is_some() {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", text);
            let _ = stdout.flush();
        }
    }
}
