//! # Exception Handles
//!
//! An [`ExceptionHandle`] is the pipeline's view of an uncaught failure: a
//! panic caught by the process hook, or a caught `std::error::Error` the
//! application chose to report as if it had escaped.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

/// Panic payloads that are neither `&str` nor `String`
const OPAQUE_PAYLOAD: &str = "Box<dyn Any>";

// Frames inward of the first match belong to the panic runtime.
const PANIC_ENTRY_MARKERS: &[&str] = &["rust_begin_unwind", "std::panicking::begin_panic", "core::panicking::"];

// Function-name fragments of the panic, unwind and capture machinery. Only a
// leading run of these is skipped; the same names further out (for example
// `std::panicking::try` under `catch_unwind`) are the application's callers.
const MACHINERY_MARKERS: &[&str] = &[
    "rust_begin_unwind",
    "core::panicking::",
    "std::panicking::",
    "__rust_end_short_backtrace",
    "std::sys::backtrace::",
    "std::sys_common::backtrace::",
    "core::option::unwrap_failed",
    "core::option::expect_failed",
    "core::result::unwrap_failed",
    "backtrace::backtrace::",
    "backtrace::capture::",
    "error_pipeline::exception::capture_frames",
    "error_pipeline::exception::ExceptionHandle::from_",
];

// Crate disambiguators in v0-demangled names, e.g. `std[e2823f1c0bd1e0a1]`
static CRATE_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[0-9a-f]+\]").unwrap());

/// One unresolved stack entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl RawFrame {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
            function: None,
        }
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

/// An uncaught failure with its site and captured call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandle {
    /// Short type description (`panic`, or the error's type name)
    pub kind: String,
    pub message: String,
    pub file: String,
    pub line: Option<u32>,
    /// Application code carried verbatim to the destination
    pub code: Option<i64>,
    /// Callers of the failure site, innermost first
    pub frames: Vec<RawFrame>,
}

impl ExceptionHandle {
    pub fn new(message: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            kind: "exception".to_string(),
            message: message.into(),
            file: file.into(),
            line: Some(line),
            code: None,
            frames: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn frames(mut self, frames: Vec<RawFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Builds a handle from the pieces a panic hook has at hand
    pub fn from_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> Self {
        let message = panic_message(payload);
        let frames = capture_frames();
        let (file, line, frames) = match location {
            Some(loc) => {
                let (file, frames) = anchor_site(loc.file(), loc.line(), frames);
                (file, Some(loc.line()), frames)
            }
            None => ("unknown file".to_string(), None, frames),
        };

        Self {
            kind: "panic".to_string(),
            message,
            file,
            line,
            code: None,
            frames,
        }
    }

    /// Builds a handle from a caught error, anchored at the caller.
    ///
    /// The message includes the whole `source()` chain.
    #[track_caller]
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let location = Location::caller();
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str("\nCaused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        let (file, frames) = anchor_site(location.file(), location.line(), capture_frames());

        Self {
            kind: "error".to_string(),
            message,
            file,
            line: Some(location.line()),
            code: None,
            frames,
        }
    }
}

impl fmt::Display for ExceptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.kind, self.message, self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        Ok(())
    }
}

/// Extracts the message of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        OPAQUE_PAYLOAD.to_string()
    }
}

/// Captures the current call stack, skipping the panic and capture machinery.
///
/// Frames without any resolved symbol are dropped; symbols without file or
/// line information are kept with those fields empty.
pub fn capture_frames() -> Vec<RawFrame> {
    let backtrace = backtrace::Backtrace::new();
    let frames: Vec<RawFrame> = backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .map(|symbol| RawFrame {
            file: symbol.filename().map(|p| p.to_string_lossy().into_owned()),
            line: symbol.lineno(),
            function: symbol.name().map(|n| n.to_string()),
        })
        .collect();

    skip_machinery(frames)
}

fn skip_machinery(frames: Vec<RawFrame>) -> Vec<RawFrame> {
    let names: Vec<Option<String>> = frames
        .iter()
        .map(|frame| frame.function.as_deref().map(|n| CRATE_HASH.replace_all(n, "").into_owned()))
        .collect();
    let matches = |idx: usize, markers: &[&str]| {
        names[idx]
            .as_deref()
            .map_or(false, |name| markers.iter().any(|m| name.contains(m)))
    };

    let entry = (0..frames.len())
        .find(|&idx| matches(idx, PANIC_ENTRY_MARKERS))
        .unwrap_or(0);
    let first_kept = (entry..frames.len())
        .find(|&idx| !matches(idx, MACHINERY_MARKERS))
        .unwrap_or(frames.len());

    frames.into_iter().skip(first_kept).collect()
}

/// Resolves a compile-time site path against the captured stack.
///
/// `Location::file` is relative to the directory rustc ran in, while debug
/// info carries absolute paths. When a frame at the same site is found, its
/// path is used for the site and the frames up to and including it are
/// dropped, so the remaining frames are the site's callers.
fn anchor_site(file: &str, line: u32, frames: Vec<RawFrame>) -> (String, Vec<RawFrame>) {
    let same_file = |frame: &RawFrame| {
        frame
            .file
            .as_deref()
            .map_or(false, |path| Path::new(path).ends_with(Path::new(file)))
    };

    let site_idx = frames.iter().position(|f| same_file(f) && f.line == Some(line));
    match site_idx {
        Some(idx) => {
            let mut callers = frames;
            let site = callers
                .drain(..=idx)
                .last()
                .and_then(|f| f.file)
                .unwrap_or_else(|| file.to_string());
            (site, callers)
        }
        None => {
            let absolute = frames
                .iter()
                .filter(|f| same_file(f))
                .find_map(|f| f.file.clone().filter(|p| Path::new(p).is_absolute()));
            (absolute.unwrap_or_else(|| file.to_string()), frames)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection refused")
        }
    }

    impl StdError for Inner {}

    #[derive(Debug)]
    struct Outer(Inner);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "failed to fetch updates")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_panic_message_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(s.as_ref()), "static str");

        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");

        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), OPAQUE_PAYLOAD);
    }

    #[test]
    fn test_from_error_includes_chain_and_caller() {
        let err = Outer(Inner);
        let handle = ExceptionHandle::from_error(&err);
        assert_eq!(handle.kind, "error");
        assert!(handle.message.starts_with("failed to fetch updates"));
        assert!(handle.message.contains("Caused by: connection refused"));
        assert!(handle.file.ends_with("exception.rs"));
        assert!(handle.line.is_some());
    }

    #[test]
    fn test_skip_machinery() {
        let frames = vec![
            RawFrame::new("/rustc/abc/library/std/src/panicking.rs", 10)
                .function("std::panicking::begin_panic_handler"),
            RawFrame::new("/rustc/abc/library/core/src/panicking.rs", 20)
                .function("core::panicking::panic_fmt"),
            RawFrame::new("src/app.rs", 7).function("app::run"),
            RawFrame::new("src/main.rs", 3).function("app::main"),
        ];
        let kept = skip_machinery(frames);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].function.as_deref(), Some("app::run"));
    }

    #[test]
    fn test_outer_catch_unwind_frames_kept() {
        let frames = vec![
            RawFrame::new("/work/error-pipeline-rs/src/exception.rs", 200)
                .function("error_pipeline::exception::capture_frames"),
            RawFrame::new("/work/error-pipeline-rs/src/runtime.rs", 275)
                .function("error_pipeline::runtime::ProcessRuntime::install_panic_hook::{{closure}}"),
            RawFrame::new("/rustc/abc/library/std/src/panicking.rs", 820)
                .function("std[e2823f1c0bd1e0a1]::panicking::rust_panic_with_hook"),
            RawFrame::new("/rustc/abc/library/std/src/panicking.rs", 665)
                .function("std[e2823f1c0bd1e0a1]::panicking::begin_panic_handler::{{closure}}"),
            RawFrame::new("/rustc/abc/library/std/src/sys/backtrace.rs", 168)
                .function("std[e2823f1c0bd1e0a1]::sys::backtrace::__rust_end_short_backtrace"),
            RawFrame::new("/rustc/abc/library/std/src/panicking.rs", 663).function("__rustc::rust_begin_unwind"),
            RawFrame::new("/rustc/abc/library/core/src/panicking.rs", 75)
                .function("core[9a1b2c3d4e5f6071]::panicking::panic_fmt"),
            RawFrame::new("/srv/bot/src/jobs.rs", 5).function("bot::jobs::inner"),
            RawFrame::new("/srv/bot/src/jobs.rs", 9).function("bot::jobs::outer"),
            RawFrame::new("/rustc/abc/library/std/src/panicking.rs", 557).function("std::panicking::try::do_call"),
            RawFrame::new("/rustc/abc/library/std/src/panic.rs", 359).function("std::panic::catch_unwind"),
            RawFrame::new("/srv/bot/src/main.rs", 19).function("bot::main"),
        ];

        let kept = skip_machinery(frames);
        let functions: Vec<&str> = kept.iter().filter_map(|f| f.function.as_deref()).collect();
        assert_eq!(
            functions,
            vec![
                "bot::jobs::inner",
                "bot::jobs::outer",
                "std::panicking::try::do_call",
                "std::panic::catch_unwind",
                "bot::main",
            ]
        );
    }

    #[test]
    fn test_leading_capture_frames_skipped_without_panic() {
        let frames = vec![
            RawFrame::new("/home/ci/.cargo/registry/src/backtrace-0.3.71/src/capture.rs", 140)
                .function("backtrace::capture::Backtrace::new"),
            RawFrame::new("/work/error-pipeline-rs/src/exception.rs", 200)
                .function("error_pipeline::exception::ExceptionHandle::from_error"),
            RawFrame::new("/work/error-pipeline-rs/src/pipeline.rs", 161)
                .function("error_pipeline::pipeline::ErrorPipeline::report_exception"),
            RawFrame::new("/srv/bot/src/jobs.rs", 30).function("bot::jobs::sync"),
            RawFrame::new("/rustc/abc/library/std/src/panicking.rs", 557).function("std::panicking::try"),
        ];

        let kept = skip_machinery(frames);
        assert_eq!(kept.len(), 3);
        assert_eq!(
            kept[0].function.as_deref(),
            Some("error_pipeline::pipeline::ErrorPipeline::report_exception")
        );
        assert_eq!(kept[1].function.as_deref(), Some("bot::jobs::sync"));
    }

    #[test]
    fn test_anchor_site_uses_absolute_path_and_drops_site_frame() {
        let frames = vec![
            RawFrame::new("/work/error-pipeline-rs/src/pipeline.rs", 161),
            RawFrame::new("/work/bot/src/jobs.rs", 5),
            RawFrame::new("/work/bot/src/jobs.rs", 9),
        ];

        let (file, callers) = anchor_site("bot/src/jobs.rs", 5, frames);
        assert_eq!(file, "/work/bot/src/jobs.rs");
        assert_eq!(callers, vec![RawFrame::new("/work/bot/src/jobs.rs", 9)]);
    }

    #[test]
    fn test_anchor_site_without_matching_line() {
        let frames = vec![RawFrame::new("/work/bot/src/jobs.rs", 40)];
        let (file, callers) = anchor_site("bot/src/jobs.rs", 5, frames.clone());
        assert_eq!(file, "/work/bot/src/jobs.rs");
        assert_eq!(callers, frames);

        let (file, callers) = anchor_site("other/src/lib.rs", 5, frames.clone());
        assert_eq!(file, "other/src/lib.rs");
        assert_eq!(callers, frames);
    }

    #[test]
    fn test_panic_site_resolves_to_readable_file() {
        let payload: Box<dyn Any + Send> = Box::new("site");
        let handle = ExceptionHandle::from_panic(payload.as_ref(), Some(Location::caller()));

        assert!(Path::new(&handle.file).is_absolute());
        assert!(Path::new(&handle.file).exists());
        assert!(handle.file.ends_with("exception.rs"));
    }

    #[test]
    fn test_display() {
        let handle = ExceptionHandle::new("boom", "src/lib.rs", 12).code(7);
        assert_eq!(handle.to_string(), "exception: boom at src/lib.rs:12 (code 7)");
    }
}
