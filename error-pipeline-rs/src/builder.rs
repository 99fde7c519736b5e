//! Pipeline builder
//!
//! Collects the dispatch target and optional collaborators, then either
//! builds a free-standing pipeline or installs it on a host runtime.

use std::sync::Arc;

use crate::dispatch::DispatchTarget;
use crate::pipeline::ErrorPipeline;
use crate::runtime::{HostRuntime, ReportingMask};
use crate::snippet::{FsSourceReader, SourceReader};

/// Builder for [`ErrorPipeline`]
pub struct PipelineBuilder {
    /// Where finished reports go
    target: DispatchTarget,

    /// Literal path prefixes redacted from reports
    path_filters: Vec<String>,

    /// Storage used for source snippets
    source_reader: Box<dyn SourceReader>,

    /// Context lines around the site in non-exception reports
    snippet_padding: u32,

    /// Mask used when the pipeline is not installed on a runtime
    mask: Option<Arc<ReportingMask>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("target", &self.target)
            .field("path_filters", &self.path_filters)
            .finish()
    }
}

impl PipelineBuilder {
    pub fn new(target: DispatchTarget) -> Self {
        Self {
            target,
            path_filters: Vec::new(),
            source_reader: Box::new(FsSourceReader),
            snippet_padding: 0,
            mask: None,
        }
    }

    /// Set the path prefixes to redact
    pub fn path_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the storage used for snippets
    pub fn source_reader(mut self, reader: impl SourceReader + 'static) -> Self {
        self.source_reader = Box::new(reader);
        self
    }

    pub fn snippet_padding(mut self, padding: u32) -> Self {
        self.snippet_padding = padding;
        self
    }

    /// Share an existing reporting mask
    pub fn reporting_mask(mut self, mask: Arc<ReportingMask>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Build a pipeline that is not attached to any runtime. Its entry points
    /// are called directly.
    pub fn build(self) -> ErrorPipeline {
        let mask = self.mask.unwrap_or_default();
        ErrorPipeline::from_parts(
            self.target,
            self.path_filters,
            self.source_reader,
            self.snippet_padding,
            mask,
        )
    }

    /// Build the pipeline and make it the exclusive handler of every failure
    /// channel of `runtime`. The runtime's mask is escalated to report
    /// everything.
    pub fn install(self, runtime: &dyn HostRuntime) -> Arc<ErrorPipeline> {
        let mask = runtime.reporting_mask();
        let pipeline = Arc::new(ErrorPipeline::from_parts(
            self.target,
            self.path_filters,
            self.source_reader,
            self.snippet_padding,
            mask,
        ));
        pipeline.register(runtime);
        pipeline
    }
}
