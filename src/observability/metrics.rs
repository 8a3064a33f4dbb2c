//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const LINK_BYTES_IN: &str = "pipemux_link_bytes_in";
const LINK_BYTES_OUT: &str = "pipemux_link_bytes_out";
const LINK_CHUNKS: &str = "pipemux_link_chunks";
const LINK_OCCUPANCY: &str = "pipemux_link_occupancy_bytes";
const LOOP_ITERATIONS: &str = "pipemux_loop_iterations";
const QUIESCENT_ITERATIONS: &str = "pipemux_quiescent_iterations";
const INTEGRITY_CHECKS: &str = "pipemux_integrity_checks";
const PIPELINE_ERRORS: &str = "pipemux_pipeline_errors";
const RUN_DURATION_SECONDS: &str = "pipemux_run_duration_seconds";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(LINK_BYTES_IN, Unit::Bytes, "Bytes read into a link buffer");
    metrics::describe_counter!(
        LINK_BYTES_OUT,
        Unit::Bytes,
        "Bytes written out of a link buffer"
    );
    metrics::describe_counter!(
        LINK_CHUNKS,
        Unit::Count,
        "Non-empty reads accepted by a link buffer"
    );
    metrics::describe_gauge!(
        LINK_OCCUPANCY,
        Unit::Bytes,
        "Bytes currently held by a link buffer"
    );
    metrics::describe_counter!(
        LOOP_ITERATIONS,
        Unit::Count,
        "Readiness loop iterations"
    );
    metrics::describe_counter!(
        QUIESCENT_ITERATIONS,
        Unit::Count,
        "Iterations in which no endpoint became ready before the timeout"
    );
    metrics::describe_counter!(
        INTEGRITY_CHECKS,
        Unit::Count,
        "Link checksum comparisons performed"
    );
    metrics::describe_counter!(PIPELINE_ERRORS, Unit::Count, "Pipelines ended by an error");
    metrics::describe_histogram!(
        RUN_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of a complete pipeline run"
    );
}

/// Metrics for one link, with labels fixed at creation.
#[derive(Clone)]
pub struct LinkMetrics {
    link: usize,
    bytes_in: Counter,
    bytes_out: Counter,
    chunks: Counter,
    occupancy: Gauge,
}

impl LinkMetrics {
    /// Create a collector for `link` in `pipeline`.
    pub fn new(pipeline: &str, link: usize) -> Self {
        let pipeline = pipeline.to_string();
        let index = link.to_string();
        Self {
            link,
            bytes_in: counter!(
                LINK_BYTES_IN,
                "pipeline" => pipeline.clone(),
                "link" => index.clone()
            ),
            bytes_out: counter!(
                LINK_BYTES_OUT,
                "pipeline" => pipeline.clone(),
                "link" => index.clone()
            ),
            chunks: counter!(LINK_CHUNKS, "pipeline" => pipeline.clone(), "link" => index.clone()),
            occupancy: gauge!(LINK_OCCUPANCY, "pipeline" => pipeline, "link" => index),
        }
    }

    /// Record a successful read of `bytes` into the link.
    #[inline]
    pub fn record_fill(&self, bytes: usize) {
        self.chunks.increment(1);
        self.bytes_in.increment(bytes as u64);
        self.occupancy.set(bytes as f64);
    }

    /// Record a write of `bytes` leaving `remaining` in the link.
    #[inline]
    pub fn record_drain(&self, bytes: usize, remaining: usize) {
        self.bytes_out.increment(bytes as u64);
        self.occupancy.set(remaining as f64);
    }

    /// Link index.
    pub fn link(&self) -> usize {
        self.link
    }
}

/// Metrics collector for an entire pipeline.
#[derive(Clone)]
pub struct PipelineMetrics {
    name: String,
    iterations: Counter,
    quiescent: Counter,
    checks: Counter,
    errors: Counter,
    duration: Histogram,
}

impl PipelineMetrics {
    /// Create a new pipeline metrics collector.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            iterations: counter!(LOOP_ITERATIONS, "pipeline" => name.to_string()),
            quiescent: counter!(QUIESCENT_ITERATIONS, "pipeline" => name.to_string()),
            checks: counter!(INTEGRITY_CHECKS, "pipeline" => name.to_string()),
            errors: counter!(PIPELINE_ERRORS, "pipeline" => name.to_string()),
            duration: histogram!(RUN_DURATION_SECONDS, "pipeline" => name.to_string()),
        }
    }

    /// Record one loop iteration.
    #[inline]
    pub fn record_iteration(&self) {
        self.iterations.increment(1);
    }

    /// Record an iteration that timed out with nothing ready.
    #[inline]
    pub fn record_quiescent(&self) {
        self.quiescent.increment(1);
    }

    /// Record `count` pairwise checksum comparisons.
    #[inline]
    pub fn record_checks(&self, count: usize) {
        self.checks.increment(count as u64);
    }

    /// Record a pipeline ending in error.
    #[inline]
    pub fn record_error(&self) {
        self.errors.increment(1);
    }

    /// Record the wall time of a finished run.
    #[inline]
    pub fn record_duration(&self, elapsed: Duration) {
        self.duration.record(elapsed.as_secs_f64());
    }

    /// Get the pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
