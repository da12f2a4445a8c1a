//! Metrics sink (A3).
//!
//! The core never binds to a specific metrics backend. It calls a narrow
//! [`MetricsSink`] trait; the host wires a concrete implementation to
//! whatever registry it already uses (Prometheus, OTel, statsd).

use std::sync::Arc;

/// Standard metric names emitted by the tracer, following the same
/// dotted-namespace convention the rest of the host's metrics use.
pub mod metric_names {
    pub const TRACES_CAPTURED: &str = "semtrace.traces.captured";
    pub const TRACES_SAMPLED_OUT: &str = "semtrace.traces.sampled_out";
    pub const TRACES_EXPORTED: &str = "semtrace.traces.exported";
    pub const TRACES_DROPPED: &str = "semtrace.traces.dropped";
    pub const PII_DETECTIONS: &str = "semtrace.pii.detections";
    pub const EXPORT_BATCH_DURATION: &str = "semtrace.exporter.batch_duration";
    pub const QUEUE_DEPTH: &str = "semtrace.exporter.queue_depth";
}

/// Standard metric labels attached to the counters/histograms above.
pub mod metric_labels {
    pub const ACTION_TYPE: &str = "action_type";
    pub const OBJECT_TYPE: &str = "object_type";
    pub const SAMPLE_REASON: &str = "sample_reason";
    pub const SERVICE_ID: &str = "service_id";
}

/// Narrow metrics capability: increment a named counter, observe a named
/// histogram value. Implementations decide units and aggregation.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: &[(&'static str, &str)]);
    fn observe_histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]);
}

/// Discards every observation. The default when a host does not supply a
/// sink, and what tests use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &'static str, _labels: &[(&'static str, &str)]) {}
    fn observe_histogram(&self, _name: &'static str, _value: f64, _labels: &[(&'static str, &str)]) {}
}

/// Type alias used by components that hold a sink behind an `Arc`.
pub type SharedMetrics = Arc<dyn MetricsSink>;

pub fn noop() -> SharedMetrics {
    Arc::new(NoopMetrics)
}
