#![allow(clippy::result_large_err)]
//! # Twinlink Core
//!
//! Acknowledgement aggregation for digital-twin commands.
//!
//! A command sent to a device twin may ask named consumers (persistence,
//! search indexing, the device itself, custom services) to confirm that they
//! handled it. This crate collects those confirmations and hands the sender
//! one merged result, with every requested label accounted for.
//!
//! ## Architecture
//!
//! - **Acks**: labels, acknowledgements, per-command request sets and the
//!   aggregate result value types
//! - **Aggregator**: the per-command state machine, the overall-status merge
//!   policy and the dispatcher that owns the correlation-id registry
//! - **Config**: limits and defaults loaded from the environment or a file
//! - **Telemetry**: structured logging and Prometheus metrics
//!
//! ```rust,no_run
//! use twinlink_core::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = AckConfig::default();
//! let dispatcher = Dispatcher::new(config.clone());
//!
//! let requests = RequestSetBuilder::new(&config)
//!     .parse_header("persisted,live-response")?
//!     .build()?;
//! let command = Command::new("org.acme:lamp-1", CorrelationId::generate());
//! let pending = dispatcher.submit(&command, requests)?;
//!
//! dispatcher.route_acknowledgement(Acknowledgement::new(
//!     AcknowledgementLabel::PERSISTED,
//!     "org.acme:lamp-1",
//!     command.correlation_id().clone(),
//!     AckStatus::NO_CONTENT,
//! ));
//!
//! let result = pending.await?;
//! println!("overall status {}", result.overall_status());
//! # Ok(())
//! # }
//! ```

pub mod acks;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, TwinlinkError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acks::{
        AckStatus, Acknowledgement, AcknowledgementLabel, AcknowledgementRequest, Acknowledgements,
        BuiltinLabel, CorrelationId, LabelRegistry, RequestSet, RequestSetBuilder,
        REQUESTED_ACKS_HEADER,
    };
    pub use crate::aggregator::{
        AggregationState, Command, Dispatcher, DispatcherStats, PendingAcknowledgements,
        RouteOutcome, SeverityMerge, StatusMerge,
    };
    pub use crate::config::{AckConfig, Config};
    pub use crate::error::{ErrorCode, ErrorSeverity, Result, TwinlinkError};
}
