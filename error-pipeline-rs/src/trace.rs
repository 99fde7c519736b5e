//! # Annotated Traces
//!
//! Turns a raw call stack into numbered frames, each carrying a filtered path
//! and a one-line source snippet. Frames outside the library roots get a
//! marker so a reader can jump straight to the first application frame.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::exception::RawFrame;
use crate::path_filter::{PathFilter, FILTER_MARKER};
use crate::snippet::SourceSnippetProvider;

/// Prefix of application-owned frames
pub const APP_FRAME_MARKER: &str = "➡";

const UNKNOWN_FILE: &str = "unknown file";
const UNKNOWN_LINE: &str = "?";

// Roots of this crate's sources, the standard library and dependency checkouts.
static LIBRARY_ROOTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|/)(error-pipeline-rs/src|rustc/[0-9a-f]+/library|\.cargo/registry/src|\.cargo/git/checkouts)(/.*)",
    )
    .unwrap()
});

/// One entry of an annotated trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub sequence_number: usize,
    /// Filtered display path
    pub file: String,
    pub line: Option<u32>,
    pub snippet: String,
    pub is_library_internal: bool,
}

impl TraceFrame {
    /// Renders `[➡ ]#<n> <path>(<line>)\n<snippet>\n\n`
    pub fn render_into(&self, out: &mut String) {
        if !self.is_library_internal {
            out.push_str(APP_FRAME_MARKER);
            out.push(' ');
        }
        let line = self
            .line
            .map(|l| l.to_string())
            .unwrap_or_else(|| UNKNOWN_LINE.to_string());
        let _ = write!(out, "#{} {}({})\n{}\n\n", self.sequence_number, self.file, line, self.snippet);
    }
}

/// Builds annotated traces from raw stacks
#[derive(Debug, Clone, Copy)]
pub struct TraceBuilder<'a> {
    snippets: &'a SourceSnippetProvider,
    paths: &'a PathFilter,
}

impl<'a> TraceBuilder<'a> {
    pub fn new(snippets: &'a SourceSnippetProvider, paths: &'a PathFilter) -> Self {
        Self { snippets, paths }
    }

    /// Frame 0 is the site itself; frame `i + 1` is `raw_frames[i]`
    pub fn build(&self, site_file: &str, site_line: Option<u32>, raw_frames: &[RawFrame]) -> Vec<TraceFrame> {
        let site = std::iter::once((Some(site_file), site_line));
        let callers = raw_frames.iter().map(|f| (f.file.as_deref(), f.line));

        site.chain(callers)
            .enumerate()
            .map(|(num, (file, line))| self.frame(num, file, line))
            .collect()
    }

    /// Builds and renders in one step
    pub fn render(&self, site_file: &str, site_line: Option<u32>, raw_frames: &[RawFrame]) -> String {
        render(&self.build(site_file, site_line, raw_frames))
    }

    fn frame(&self, sequence_number: usize, file: Option<&str>, line: Option<u32>) -> TraceFrame {
        let file = file.unwrap_or(UNKNOWN_FILE);
        let snippet = self.snippets.snippet(file, line.unwrap_or(0), 0);
        let filtered = self.paths.filter(file);

        let (display, is_library_internal) = match LIBRARY_ROOTS.captures(&filtered) {
            Some(caps) => (format!("{}/{}{}", FILTER_MARKER, &caps[1], &caps[2]), true),
            None => (filtered, false),
        };

        TraceFrame {
            sequence_number,
            file: display,
            line,
            snippet,
            is_library_internal,
        }
    }
}

/// Renders every frame, no depth limit
pub fn render(frames: &[TraceFrame]) -> String {
    let mut out = String::new();
    for frame in frames {
        frame.render_into(&mut out);
    }
    out
}
