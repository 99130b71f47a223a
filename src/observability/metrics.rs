//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const FRAMES_INTERCEPTED: &str = "interpose_frames_intercepted";
const FRAMES_RESTORED: &str = "interpose_frames_restored";
const FRAME_POOL_SLOTS: &str = "interpose_frame_pool_slots";
const REWIRES: &str = "interpose_rewires";
const DISPOSALS_DEFERRED: &str = "interpose_disposals_deferred";
const USAGE_UNDERFLOWS: &str = "interpose_usage_underflows";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        FRAMES_INTERCEPTED,
        Unit::Count,
        "Frames wrapped by a frame proxy"
    );
    metrics::describe_counter!(
        FRAMES_RESTORED,
        Unit::Count,
        "Frame proxies restored to their pool"
    );
    metrics::describe_gauge!(
        FRAME_POOL_SLOTS,
        Unit::Count,
        "Frame proxies allocated by a port's pool"
    );
    metrics::describe_counter!(REWIRES, Unit::Count, "Completed output rewires");
    metrics::describe_counter!(
        DISPOSALS_DEFERRED,
        Unit::Count,
        "Stage disposal attempts deferred because a port was in use"
    );
    metrics::describe_counter!(
        USAGE_UNDERFLOWS,
        Unit::Count,
        "Usage counter decrements clamped at zero"
    );
}

/// Record a completed rewire.
#[inline]
pub fn record_rewire(stage: &str, output: &str) {
    counter!(REWIRES, "stage" => stage.to_string(), "output" => output.to_string()).increment(1);
}

/// Record a deferred disposal attempt.
#[inline]
pub fn record_disposal_deferred(stage: &str) {
    counter!(DISPOSALS_DEFERRED, "stage" => stage.to_string()).increment(1);
}

/// Metrics collector for one proxied port.
///
/// Handles are resolved once with the stage and port labels.
#[derive(Clone)]
pub struct PortMetrics {
    stage: String,
    port: String,
    intercepted: Counter,
    restored: Counter,
    pool_slots: Gauge,
    underflows: Counter,
}

impl PortMetrics {
    /// Create a collector for `port` of `stage`.
    pub fn new(stage: &str, port: &str) -> Self {
        Self {
            stage: stage.to_string(),
            port: port.to_string(),
            intercepted: counter!(
                FRAMES_INTERCEPTED,
                "stage" => stage.to_string(),
                "port" => port.to_string()
            ),
            restored: counter!(
                FRAMES_RESTORED,
                "stage" => stage.to_string(),
                "port" => port.to_string()
            ),
            pool_slots: gauge!(
                FRAME_POOL_SLOTS,
                "stage" => stage.to_string(),
                "port" => port.to_string()
            ),
            underflows: counter!(
                USAGE_UNDERFLOWS,
                "stage" => stage.to_string(),
                "port" => port.to_string()
            ),
        }
    }

    /// Record an intercepted frame.
    #[inline]
    pub fn record_intercepted(&self) {
        self.intercepted.increment(1);
    }

    /// Record a restored frame proxy.
    #[inline]
    pub fn record_restored(&self) {
        self.restored.increment(1);
    }

    /// Record the pool's slot count.
    #[inline]
    pub fn record_pool_slots(&self, slots: usize) {
        self.pool_slots.set(slots as f64);
    }

    /// Record a clamped usage decrement.
    #[inline]
    pub fn record_underflow(&self) {
        self.underflows.increment(1);
    }

    /// Get the stage name.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Get the port name.
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl std::fmt::Debug for PortMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMetrics")
            .field("stage", &self.stage)
            .field("port", &self.port)
            .finish()
    }
}
