//! Acknowledgement value types.
//!
//! Everything here is immutable once constructed and can be shared between
//! tasks without synchronization:
//!
//! - [`AcknowledgementLabel`] / [`LabelRegistry`]: who confirms
//! - [`Acknowledgement`]: one consumer's verdict for one correlation
//! - [`RequestSet`]: which labels a command waits for, and for how long
//! - [`Acknowledgements`]: the merged result of one command

mod ack;
mod aggregate;
mod label;
mod request;
mod status;

pub use ack::{Acknowledgement, CorrelationId};
pub use aggregate::Acknowledgements;
pub use label::{AcknowledgementLabel, BuiltinLabel, CustomLabel, LabelRegistry};
pub use request::{AcknowledgementRequest, RequestSet, RequestSetBuilder, REQUESTED_ACKS_HEADER};
pub use status::AckStatus;
