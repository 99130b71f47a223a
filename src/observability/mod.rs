//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters and gauges via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `interpose_frames_intercepted` | Counter | Frames wrapped by a proxy |
//! | `interpose_frames_restored` | Counter | Proxies returned to their pool |
//! | `interpose_frame_pool_slots` | Gauge | Proxies allocated per port |
//! | `interpose_rewires` | Counter | Completed rewires |
//! | `interpose_disposals_deferred` | Counter | Disposals deferred by usage |
//! | `interpose_usage_underflows` | Counter | Clamped usage decrements |
//!
//! ## Tracing
//!
//! Spans are emitted for rewires and disposal attempts; frame traffic is
//! logged at `trace` level.
//!
//! ## Example
//!
//! ```rust,ignore
//! use interpose::observability::init_metrics;
//!
//! // Call once at startup, then install any metrics exporter
//! init_metrics();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{PortMetrics, init_metrics, record_disposal_deferred, record_rewire};
pub use tracing_support::{
    instrument_dispose, span_rewire, span_stage, trace_intercept, trace_restore, trace_violation,
};
