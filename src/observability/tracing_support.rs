//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Create a span for work done on behalf of a stage.
///
/// # Example
///
/// ```rust
/// use interpose::observability::span_stage;
///
/// let span = span_stage("deinterlace");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_stage(stage: &str) -> Span {
    span!(Level::INFO, "stage", stage = %stage)
}

/// Create a span for a rewire of one stage output.
#[inline]
pub fn span_rewire(stage: &str, output: &str) -> Span {
    span!(Level::INFO, "rewire", stage = %stage, output = %output)
}

/// Enter a span for a stage disposal attempt.
pub fn instrument_dispose(stage: &str) -> tracing::span::EnteredSpan {
    span!(Level::DEBUG, "dispose", stage = %stage).entered()
}

/// Log a frame wrapped by a proxy.
#[inline]
pub fn trace_intercept(stage: &str, port: &str, slot: usize) {
    tracing::trace!(stage = %stage, port = %port, slot, "frame intercepted");
}

/// Log a frame proxy returned to its pool.
#[inline]
pub fn trace_restore(stage: &str, port: &str, slot: usize) {
    tracing::trace!(stage = %stage, port = %port, slot, "frame restored");
}

/// Log a lifecycle contract violation.
#[inline]
pub fn trace_violation(stage: &str, port: &str, what: &str) {
    tracing::error!(stage = %stage, port = %port, violation = %what, "contract violation");
}
