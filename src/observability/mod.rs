//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters, gauges and histograms via `metrics-rs`. Recording is
//!   a no-op until the application installs a recorder.
//! - **Tracing**: structured logging and spans via `tracing`.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `pipemux_link_bytes_in` | Counter | Bytes read into a link |
//! | `pipemux_link_bytes_out` | Counter | Bytes written out of a link |
//! | `pipemux_link_chunks` | Counter | Non-empty reads per link |
//! | `pipemux_link_occupancy_bytes` | Gauge | Bytes held by a link |
//! | `pipemux_loop_iterations` | Counter | Readiness loop iterations |
//! | `pipemux_quiescent_iterations` | Counter | Iterations with nothing ready |
//! | `pipemux_integrity_checks` | Counter | Checksum pair comparisons |
//! | `pipemux_pipeline_errors` | Counter | Runs ended by an error |
//! | `pipemux_run_duration_seconds` | Histogram | Wall time per run |
//!
//! ## Tracing
//!
//! A `pipeline` span covers each run and a `stage` span covers each spawn.
//! Per-chunk events are emitted at `trace` level, end-of-stream at `debug`.

mod metrics;
mod tracing_support;

pub use metrics::{LinkMetrics, PipelineMetrics, init_metrics};
pub use tracing_support::{
    instrument_stage, span_pipeline, span_stage, trace_eos, trace_error,
    trace_link_drained, trace_link_filled, trace_quiescent,
};
