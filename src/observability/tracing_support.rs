//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Create a span for a pipeline run.
///
/// # Example
///
/// ```rust,ignore
/// use pipemux::observability::span_pipeline;
///
/// let span = span_pipeline("my-pipeline", 3);
/// let _guard = span.enter();
/// // Pipeline execution here...
/// ```
#[inline]
pub fn span_pipeline(name: &str, stages: usize) -> Span {
    span!(Level::INFO, "pipeline", name = %name, stages = stages)
}

/// Create a span for spawning one stage.
#[inline]
pub fn span_stage(pipeline: &str, index: usize, program: &str) -> Span {
    span!(
        Level::DEBUG,
        "stage",
        pipeline = %pipeline,
        index = index,
        program = %program
    )
}

/// Enter a stage span, returning the guard.
pub fn instrument_stage(pipeline: &str, index: usize, program: &str) -> tracing::span::EnteredSpan {
    span_stage(pipeline, index, program).entered()
}

/// Log a chunk read into a link.
#[inline]
pub fn trace_link_filled(link: usize, size: usize, checksum: u64) {
    tracing::trace!(link = link, size = size, checksum = checksum, "link filled");
}

/// Log a (possibly partial) write out of a link.
#[inline]
pub fn trace_link_drained(link: usize, written: usize, remaining: usize) {
    tracing::trace!(
        link = link,
        written = written,
        remaining = remaining,
        "link drained"
    );
}

/// Log end-of-stream on a link.
#[inline]
pub fn trace_eos(link: usize, bytes: u64, checksum: u64) {
    tracing::debug!(link = link, bytes = bytes, checksum = checksum, "end of stream");
}

/// Log a quiescent iteration.
#[inline]
pub fn trace_quiescent(iteration: u64, occupied: usize) {
    tracing::trace!(iteration = iteration, occupied_links = occupied, "pipeline quiescent");
}

/// Log an error that ended the pipeline.
#[inline]
pub fn trace_error(pipeline: &str, error: &dyn std::error::Error) {
    tracing::error!(pipeline = %pipeline, error = %error, "pipeline failed");
}
