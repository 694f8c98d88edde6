//! Error handling for Twinlink Core.
//!
//! This module provides:
//! - A single error type with stable, machine-readable error codes
//! - Severity classification that drives logging levels
//! - HTTP-semantics status mapping for the response path
//! - Metrics integration for error tracking
//!
//! Only construction-time failures surface as errors. Everything that happens
//! while an aggregation is running (partial failures, per-label timeouts,
//! stale acknowledgements) is folded into the aggregate result instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use twinlink_core::error::{Result, TwinlinkError};
//!
//! fn check(label: &str) -> Result<()> {
//!     if label.is_empty() {
//!         return Err(TwinlinkError::invalid_label(label, "label must not be empty"));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::acks::CorrelationId;
use crate::telemetry::metrics::ERRORS;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Twinlink operations.
pub type Result<T> = std::result::Result<T, TwinlinkError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Label Errors (1000-1099)
    InvalidLabel,

    // Request Set Errors (1100-1199)
    DuplicateLabel,
    TooManyLabels,

    // Aggregation Errors (1200-1299)
    DuplicateCorrelationId,
    AggregationAbandoned,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidLabel => 1000,

            Self::DuplicateLabel => 1100,
            Self::TooManyLabels => 1101,

            Self::DuplicateCorrelationId => 1200,
            Self::AggregationAbandoned => 1201,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP-semantics status the response path should use for this error.
    pub const fn http_status(&self) -> u16 {
        match self {
            // Bad Request (400)
            Self::InvalidLabel | Self::DuplicateLabel | Self::TooManyLabels => 400,

            // Conflict (409)
            Self::DuplicateCorrelationId => 409,

            // Request Timeout (408)
            Self::AggregationAbandoned => 408,

            // Internal Server Error (500)
            Self::ConfigurationError | Self::InvalidConfiguration | Self::InternalError => 500,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "label",
            1100..=1199 => "request_set",
            1200..=1299 => "aggregation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad labels, malformed request sets)
    Low,
    /// Integration errors (reused correlation ids, abandoned aggregations)
    Medium,
    /// System errors (bad configuration)
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidLabel | ErrorCode::DuplicateLabel | ErrorCode::TooManyLabels => {
                Self::Low
            }

            ErrorCode::DuplicateCorrelationId | ErrorCode::AggregationAbandoned => Self::Medium,

            ErrorCode::ConfigurationError | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (label, correlation id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Twinlink Core.
#[derive(Error, Debug)]
pub struct TwinlinkError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to hand back to the command-building caller
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TwinlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl TwinlinkError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a caller-facing and an internal message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the caller-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP-semantics status.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "Twinlink error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    entity_id = ?self.details.entity_id,
                    "Twinlink error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Twinlink error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            ERRORS,
            "code" => self.code.to_string(),
            "category" => self.code.category(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for TwinlinkError {
    fn from(error: config::ConfigError) -> Self {
        let (code, message) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::ConfigurationError,
                "Required configuration value is missing",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, message, error.to_string()).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl TwinlinkError {
    /// A candidate acknowledgement label failed validation.
    pub fn invalid_label(candidate: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            ErrorCode::InvalidLabel,
            format!("Invalid acknowledgement label '{}': {}", candidate, reason),
        )
        .with_details(ErrorDetails::new().with_entity("label", candidate))
    }

    /// A custom label collides with a built-in one.
    pub fn reserved_label(candidate: &str) -> Self {
        Self::invalid_label(candidate, "label is reserved for built-in acknowledgements")
    }

    /// The same label was requested twice for one command.
    pub fn duplicate_label(label: &str) -> Self {
        Self::new(
            ErrorCode::DuplicateLabel,
            format!("Acknowledgement label '{}' was requested more than once", label),
        )
        .with_details(ErrorDetails::new().with_entity("label", label))
    }

    /// A request set exceeds the configured label limit.
    pub fn too_many_labels(requested: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::TooManyLabels,
            format!(
                "{} acknowledgement labels requested, at most {} are allowed",
                requested, max
            ),
        )
        .with_context("requested", requested)
        .with_context("max", max)
    }

    /// An aggregation is already open under this correlation id.
    pub fn duplicate_correlation_id(correlation_id: &CorrelationId) -> Self {
        Self::new(
            ErrorCode::DuplicateCorrelationId,
            format!(
                "An acknowledgement aggregation is already open for correlation id '{}'",
                correlation_id
            ),
        )
        .with_details(ErrorDetails::new().with_entity("correlation_id", correlation_id.as_str()))
    }

    /// The aggregation went away without producing a result.
    pub fn aggregation_abandoned(correlation_id: &CorrelationId) -> Self {
        Self::new(
            ErrorCode::AggregationAbandoned,
            format!(
                "Acknowledgement aggregation for correlation id '{}' was abandoned",
                correlation_id
            ),
        )
        .with_details(ErrorDetails::new().with_entity("correlation_id", correlation_id.as_str()))
    }

    /// A configuration value is out of range.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Configuration is invalid",
            message,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
