//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use twinlink_core::{config::Config, telemetry::init_telemetry};
//!
//! let config = Config::load().expect("configuration");
//! let telemetry = init_telemetry(&config).expect("telemetry installs once");
//! ```

pub mod logging;
pub mod metrics;

pub use self::logging::{build_filter, init_logging, LogFormat, LoggingConfig};
pub use self::metrics::{init_metrics, AckMetrics, MetricsConfig, MetricsRegistry};

use crate::config::Config;

/// Install logging and metrics from one configuration.
///
/// Call once at startup. Metrics come first so that nothing recorded while
/// logging initializes is lost.
pub fn init_telemetry(config: &Config) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics)?;
    init_logging(&config.logging)?;

    ::tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        metrics = metrics.is_enabled(),
        "Telemetry initialized"
    );

    Ok(TelemetryHandle { metrics })
}

/// Keeps the installed telemetry reachable.
#[derive(Debug)]
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}
