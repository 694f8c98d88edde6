//! Prometheus metrics for acknowledgement aggregation.
//!
//! Recording goes through the `metrics` facade, so every call is a no-op
//! until [`init_metrics`] installs the Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use twinlink_core::telemetry::metrics::{init_metrics, MetricsConfig};
//!
//! let registry = init_metrics(&MetricsConfig::default()).expect("recorder installs once");
//! println!("{}", registry.render());
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::acks::AcknowledgementLabel;

pub const AGGREGATIONS_STARTED: &str = "twinlink_aggregations_started_total";
pub const AGGREGATIONS_FINISHED: &str = "twinlink_aggregations_finished_total";
pub const AGGREGATIONS_OPEN: &str = "twinlink_aggregations_open";
pub const AGGREGATION_DURATION: &str = "twinlink_aggregation_duration_seconds";
pub const REQUESTED_LABELS: &str = "twinlink_requested_labels";
pub const ACK_STALE: &str = "twinlink_ack_stale_total";
pub const ACK_IGNORED: &str = "twinlink_ack_ignored_total";
pub const ERRORS: &str = "twinlink_errors_total";

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for aggregation durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
}

/// Handle to the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry that renders nothing.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if the buckets are empty or a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(buckets = config.duration_buckets.len(), "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
pub fn register_metric_descriptions() {
    describe_counter!(AGGREGATIONS_STARTED, "Aggregations opened for commands requesting acknowledgements");
    describe_counter!(AGGREGATIONS_FINISHED, "Aggregations that delivered a result, by outcome");
    describe_gauge!(AGGREGATIONS_OPEN, "Aggregations currently waiting for acknowledgements");
    describe_histogram!(AGGREGATION_DURATION, "Time from submission to result delivery in seconds");
    describe_histogram!(REQUESTED_LABELS, "Number of labels requested per aggregation");
    describe_counter!(ACK_STALE, "Acknowledgements for unknown or finished correlation ids");
    describe_counter!(ACK_IGNORED, "Acknowledgements an open aggregation did not record, by reason");
    describe_counter!(ERRORS, "Errors raised, by code");
}

/// Aggregation lifecycle metrics.
pub struct AckMetrics;

impl AckMetrics {
    pub fn aggregation_started(requested: usize) {
        counter!(AGGREGATIONS_STARTED).increment(1);
        histogram!(REQUESTED_LABELS).record(requested as f64);
    }

    /// Record a delivered result.
    ///
    /// `outcome` is one of `completed`, `timed_out` or `cancelled`.
    pub fn aggregation_finished(outcome: &'static str, overall_status: u16, elapsed: Duration) {
        counter!(
            AGGREGATIONS_FINISHED,
            "outcome" => outcome,
            "status_class" => status_class(overall_status),
        )
        .increment(1);
        histogram!(AGGREGATION_DURATION, "outcome" => outcome).record(elapsed.as_secs_f64());
    }

    pub fn set_open(open: usize) {
        gauge!(AGGREGATIONS_OPEN).set(open as f64);
    }

    /// Custom labels are collapsed into one series to bound cardinality.
    pub fn stale_arrival(label: &AcknowledgementLabel) {
        let label = if label.is_builtin() { label.as_str().to_string() } else { "custom".to_string() };
        counter!(ACK_STALE, "label" => label).increment(1);
    }

    pub fn ignored(reason: &'static str) {
        counter!(ACK_IGNORED, "reason" => reason).increment(1);
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
