//! Acknowledgement aggregation.
//!
//! A command that requests acknowledgements is registered with the
//! [`Dispatcher`], which opens one [`Aggregator`] per correlation id. Consumer
//! acknowledgements are routed to it until every requested label has an entry
//! or its deadline has passed; the merged [`Acknowledgements`](crate::acks::Acknowledgements)
//! are then delivered through the [`PendingAcknowledgements`] future handed
//! out at submission.
//!
//! ```text
//! submit ──▶ Dispatcher ──open──▶ Aggregator ──settle──▶ Completion ──deliver──▶ PendingAcknowledgements
//!                ▲                    ▲
//!   route_acknowledgement      deadline task
//! ```

mod dispatcher;
mod merge;
mod pending;
mod state;

pub use dispatcher::{Command, Dispatcher, DispatcherStats, RouteOutcome};
pub use merge::{SeverityMerge, StatusMerge};
pub use pending::PendingAcknowledgements;
pub use state::{AggregationState, Aggregator, Completion, IgnoreReason, Transition};
