//! Configuration management.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TwinlinkError};
use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Environment variable prefix, e.g. `TWINLINK__ACKS__MAX_LABELS=8`.
const ENV_PREFIX: &str = "TWINLINK";

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Acknowledgement handling
    #[serde(default)]
    pub acks: AckConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prometheus recorder
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Limits and defaults for acknowledgement requests.
#[derive(Debug, Clone, Deserialize)]
pub struct AckConfig {
    /// Timeout for labels that do not carry their own
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Maximum number of labels one command may request
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,

    /// Maximum label length in characters
    #[serde(default = "default_max_label_length")]
    pub max_label_length: usize,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            max_labels: default_max_labels(),
            max_label_length: default_max_label_length(),
        }
    }
}

impl AckConfig {
    /// Reject limits no command could ever satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(TwinlinkError::invalid_configuration(
                "acks.default_timeout must be greater than zero",
            ));
        }
        if self.max_labels == 0 {
            return Err(TwinlinkError::invalid_configuration(
                "acks.max_labels must be at least 1",
            ));
        }
        if self.max_label_length == 0 {
            return Err(TwinlinkError::invalid_configuration(
                "acks.max_label_length must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> Duration { Duration::from_secs(10) }
fn default_max_labels() -> usize { 20 }
fn default_max_label_length() -> usize { 165 }

impl Config {
    /// Load configuration from the environment (and a `.env` file if present).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file, with environment variables taking precedence.
    ///
    /// A file that cannot be parsed fails with `InvalidConfiguration`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.acks.validate()
    }
}
