//! Metrics and telemetry collaborators.
//!
//! Both collaborators are optional: the runtime accepts any implementation
//! and the no-op variants satisfy the contracts without side effects, so
//! their absence never affects message flow.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::Span;

/// Metric names emitted by the runtime
pub mod metric {
    pub const MANAGER_CONNECTED: &str = "queue_manager_connected";
    pub const EXCHANGE_CREATED: &str = "queue_exchange_created";
    pub const QUEUE_CREATED: &str = "queue_created";
    pub const QUEUE_BOUND: &str = "queue_binded";
    pub const CONSUMER_CONNECTED: &str = "queue_consumer_connected";
    pub const MESSAGES_ACK: &str = "queue_messages_ack";
    pub const MESSAGES_NACK: &str = "queue_messages_nack";
    pub const MESSAGES_PUBLISH: &str = "queue_messages_publish";
}

/// Label pairs attached to a metric sample
pub type MetricLabels<'a> = [(&'a str, &'a str)];

/// Counter and gauge sink consumed by the runtime
pub trait Metrics: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &MetricLabels<'_>);
    fn set_gauge(&self, name: &str, value: f64, labels: &MetricLabels<'_>);
}

/// Metrics sink that discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment_counter(&self, _name: &str, _labels: &MetricLabels<'_>) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &MetricLabels<'_>) {}
}

/// Metrics sink backed by the `metrics` facade; samples land in whatever
/// recorder the application installed (Prometheus exporter or similar)
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeMetrics;

impl RuntimeMetrics {
    fn to_labels(labels: &MetricLabels<'_>) -> Vec<metrics::Label> {
        labels
            .iter()
            .map(|(key, value)| metrics::Label::new(key.to_string(), value.to_string()))
            .collect()
    }
}

impl Metrics for RuntimeMetrics {
    fn increment_counter(&self, name: &str, labels: &MetricLabels<'_>) {
        metrics::counter!(name.to_string(), Self::to_labels(labels)).increment(1);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &MetricLabels<'_>) {
        metrics::gauge!(name.to_string(), Self::to_labels(labels)).set(value);
    }
}

/// Recording sink for tests and local development: samples are kept
/// in memory and can be asserted on
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_key(name: &str, labels: &MetricLabels<'_>) -> String {
        let mut sorted: Vec<_> = labels.iter().collect();
        sorted.sort();
        let labels = sorted
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{name}{{{labels}}}")
    }

    /// Current counter value for the exact name and label set
    pub fn counter_value(&self, name: &str, labels: &MetricLabels<'_>) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .get(&Self::series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Current gauge value for the exact name and label set
    pub fn gauge_value(&self, name: &str, labels: &MetricLabels<'_>) -> Option<f64> {
        let gauges = self.gauges.lock().unwrap_or_else(|e| e.into_inner());
        gauges.get(&Self::series_key(name, labels)).copied()
    }
}

impl Metrics for RecordingMetrics {
    fn increment_counter(&self, name: &str, labels: &MetricLabels<'_>) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(Self::series_key(name, labels)).or_insert(0) += 1;
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &MetricLabels<'_>) {
        let mut gauges = self.gauges.lock().unwrap_or_else(|e| e.into_inner());
        gauges.insert(Self::series_key(name, labels), value);
    }
}

/// Opaque span handle returned by [`Telemetry`]
#[derive(Debug)]
pub struct TelemetrySpan {
    inner: Option<Span>,
}

impl TelemetrySpan {
    /// Span that records nothing
    pub fn noop() -> Self {
        Self { inner: None }
    }

    fn from_span(span: Span) -> Self {
        Self { inner: Some(span) }
    }
}

/// Span factory wrapping publish calls and per-delivery processing
pub trait Telemetry: Send + Sync {
    /// Span rooting a delivery-processing pipeline
    fn root_span(&self, name: &str, attrs: &MetricLabels<'_>) -> TelemetrySpan;

    /// Span nested under the caller's current context
    fn child_span(&self, name: &str, attrs: &MetricLabels<'_>) -> TelemetrySpan;

    /// Close a span, recording the terminal error if any
    fn end_span(&self, span: TelemetrySpan, error: Option<&(dyn std::error::Error + 'static)>);
}

/// Telemetry that produces inert spans
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn root_span(&self, _name: &str, _attrs: &MetricLabels<'_>) -> TelemetrySpan {
        TelemetrySpan::noop()
    }

    fn child_span(&self, _name: &str, _attrs: &MetricLabels<'_>) -> TelemetrySpan {
        TelemetrySpan::noop()
    }

    fn end_span(&self, _span: TelemetrySpan, _error: Option<&(dyn std::error::Error + 'static)>) {}
}

/// Telemetry backed by `tracing` spans
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn root_span(&self, name: &str, attrs: &MetricLabels<'_>) -> TelemetrySpan {
        TelemetrySpan::from_span(tracing::info_span!(
            parent: None,
            "broker_operation",
            operation = name,
            attrs = ?attrs,
        ))
    }

    fn child_span(&self, name: &str, attrs: &MetricLabels<'_>) -> TelemetrySpan {
        TelemetrySpan::from_span(tracing::info_span!(
            "broker_operation",
            operation = name,
            attrs = ?attrs,
        ))
    }

    fn end_span(&self, span: TelemetrySpan, error: Option<&(dyn std::error::Error + 'static)>) {
        if let Some(span) = span.inner {
            if let Some(error) = error {
                span.in_scope(|| tracing::error!(error = %error, "operation failed"));
            }
        }
    }
}

#[cfg(test)]
#[path = "observe_tests.rs"]
mod tests;
