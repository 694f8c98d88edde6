//! Overall-status derivation.
//!
//! The policy is kept behind [`StatusMerge`] so it can be swapped without
//! touching the aggregator state machine.

use std::fmt;

use crate::acks::{AckStatus, Acknowledgement};

/// Derives one overall status from the final set of entries.
///
/// Implementations must depend only on the set of entries, never on their
/// order, so that the result is independent of arrival order.
pub trait StatusMerge: fmt::Debug + Send + Sync {
    fn merge(&self, requested: usize, entries: &[Acknowledgement]) -> AckStatus;
}

/// Default policy: the most severe failure wins.
///
/// - every entry successful and exactly one label requested: that entry's status
/// - every entry successful otherwise: 200
/// - any failure: the failing status with the highest rank, where rank is the
///   numeric status except that an entry filled in for a missed deadline ranks
///   above every other 4xx; a consumer reporting 408 itself ranks as plain 408
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityMerge;

impl SeverityMerge {
    /// Sort key for failing entries.
    fn rank(entry: &Acknowledgement) -> u32 {
        if entry.is_timeout() {
            // between 499 and 500
            4995
        } else {
            u32::from(entry.status().as_u16()) * 10
        }
    }
}

impl StatusMerge for SeverityMerge {
    fn merge(&self, requested: usize, entries: &[Acknowledgement]) -> AckStatus {
        let worst = entries
            .iter()
            .filter(|entry| entry.status().is_failure())
            .max_by_key(|entry| Self::rank(entry));

        match worst {
            Some(entry) => entry.status(),
            None if requested == 1 && entries.len() == 1 => entries[0].status(),
            None => AckStatus::OK,
        }
    }
}
