//! Per-correlation aggregation state machine.
//!
//! An [`Aggregator`] tracks one in-flight command. Every transition runs under
//! one exclusive lock, so acknowledgements, deadline expiry and cancellation
//! are applied one at a time no matter how many tasks deliver them.
//!
//! The aggregator never talks to the registry. A transition that finishes the
//! aggregation hands back a [`Completion`]; whoever owns the registry removes
//! the entry first and only then delivers the result.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::merge::StatusMerge;
use super::PendingAcknowledgements;
use crate::acks::{Acknowledgement, AcknowledgementLabel, Acknowledgements, CorrelationId, RequestSet};

/// Lifecycle of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationState {
    /// Waiting for outstanding labels.
    Open,
    /// Every label reported before its deadline.
    Completed,
    /// At least one label was filled in with a timeout entry.
    TimedOut,
}

impl AggregationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for AggregationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an acknowledgement did not change the aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    /// The label was not requested by the command.
    NotRequested,
    /// The label already has an entry; the first one wins.
    AlreadyReceived,
    /// The aggregation already finished.
    Terminal,
    /// The acknowledgement names a different correlation id.
    WrongCorrelation,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequested => "not_requested",
            Self::AlreadyReceived => "already_received",
            Self::Terminal => "terminal",
            Self::WrongCorrelation => "wrong_correlation",
        }
    }
}

/// Outcome of applying one event to an aggregator.
#[must_use]
#[derive(Debug)]
pub enum Transition {
    /// Nothing changed.
    Ignored(IgnoreReason),
    /// The event was recorded; labels remain outstanding.
    Pending { outstanding: usize },
    /// The aggregation reached a terminal state.
    Finished(Completion),
}

/// A finished aggregation whose result has not been delivered yet.
#[must_use = "the waiting command only sees the result once `deliver` is called"]
pub struct Completion {
    state: AggregationState,
    result: Acknowledgements,
    sink: Option<oneshot::Sender<Acknowledgements>>,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state)
            .field("result", &self.result)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Completion {
    pub fn state(&self) -> AggregationState {
        self.state
    }

    pub fn result(&self) -> &Acknowledgements {
        &self.result
    }

    /// Hand the result to the waiting command.
    ///
    /// Returns `false` if nobody is waiting any more.
    pub fn deliver(mut self) -> bool {
        match self.sink.take() {
            Some(sink) => sink.send(self.result).is_ok(),
            None => false,
        }
    }
}

/// Upper bound on how far out a label deadline is scheduled (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `opened_at + timeout`, clamped so huge timeouts never overflow `Instant`.
fn deadline_after(opened_at: Instant, timeout: Duration) -> Instant {
    match opened_at.checked_add(timeout) {
        Some(deadline) if timeout <= FAR_FUTURE => deadline,
        _ => opened_at + FAR_FUTURE,
    }
}

struct LabelSlot {
    label: AcknowledgementLabel,
    deadline: Instant,
}

struct Tracking {
    state: AggregationState,
    /// Arrival order.
    received: Vec<Acknowledgement>,
    /// Timeout entries filled in by the aggregator itself.
    synthesized: usize,
    sink: Option<oneshot::Sender<Acknowledgements>>,
}

impl Tracking {
    fn has(&self, label: &AcknowledgementLabel) -> bool {
        self.received.iter().any(|ack| ack.label() == label)
    }
}

/// Tracks the acknowledgements of one in-flight command.
pub struct Aggregator {
    entity_id: String,
    correlation_id: CorrelationId,
    requests: Arc<RequestSet>,
    slots: Vec<LabelSlot>,
    opened_at: Instant,
    merge: Arc<dyn StatusMerge>,
    tracking: Mutex<Tracking>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("entity_id", &self.entity_id)
            .field("correlation_id", &self.correlation_id)
            .field("requested", &self.requests.len())
            .field("state", &self.state())
            .finish()
    }
}

impl Aggregator {
    /// Open an aggregation for a non-empty request set.
    ///
    /// Each label's deadline is `opened_at` plus its effective timeout, capped
    /// at roughly thirty years. The
    /// returned future resolves once the aggregator reaches a terminal state
    /// and its [`Completion`] is delivered.
    pub fn open(
        requests: Arc<RequestSet>,
        entity_id: impl Into<String>,
        correlation_id: CorrelationId,
        opened_at: Instant,
        merge: Arc<dyn StatusMerge>,
    ) -> (Self, PendingAcknowledgements) {
        let (sink, receiver) = oneshot::channel();
        let slots = requests
            .requests()
            .iter()
            .map(|request| LabelSlot {
                label: request.label().clone(),
                deadline: deadline_after(
                    opened_at,
                    request.timeout().unwrap_or(requests.default_timeout()),
                ),
            })
            .collect();

        let pending = PendingAcknowledgements::waiting(correlation_id.clone(), receiver);
        let aggregator = Self {
            entity_id: entity_id.into(),
            correlation_id,
            requests,
            slots,
            opened_at,
            merge,
            tracking: Mutex::new(Tracking {
                state: AggregationState::Open,
                received: Vec::new(),
                synthesized: 0,
                sink: Some(sink),
            }),
        };
        (aggregator, pending)
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn requests(&self) -> &RequestSet {
        &self.requests
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn state(&self) -> AggregationState {
        self.tracking.lock().state
    }

    /// Labels that have not been resolved yet, in request order.
    pub fn outstanding(&self) -> Vec<AcknowledgementLabel> {
        let tracking = self.tracking.lock();
        self.slots
            .iter()
            .filter(|slot| !tracking.has(&slot.label))
            .map(|slot| slot.label.clone())
            .collect()
    }

    /// Earliest deadline among unresolved labels, or `None` once terminal.
    pub fn next_deadline(&self) -> Option<Instant> {
        let tracking = self.tracking.lock();
        if tracking.state.is_terminal() {
            return None;
        }
        self.slots
            .iter()
            .filter(|slot| !tracking.has(&slot.label))
            .map(|slot| slot.deadline)
            .min()
    }

    /// Record a consumer's acknowledgement. The first arrival per label wins.
    pub fn accept(&self, ack: Acknowledgement) -> Transition {
        if ack.correlation_id() != &self.correlation_id {
            return Transition::Ignored(IgnoreReason::WrongCorrelation);
        }

        let mut tracking = self.tracking.lock();
        if tracking.state.is_terminal() {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                label = %ack.label(),
                state = %tracking.state,
                "Late acknowledgement ignored"
            );
            return Transition::Ignored(IgnoreReason::Terminal);
        }
        if !self.requests.contains(ack.label()) {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                label = %ack.label(),
                "Acknowledgement for unrequested label ignored"
            );
            return Transition::Ignored(IgnoreReason::NotRequested);
        }
        if tracking.has(ack.label()) {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                label = %ack.label(),
                "Duplicate acknowledgement ignored"
            );
            return Transition::Ignored(IgnoreReason::AlreadyReceived);
        }

        tracing::debug!(
            correlation_id = %self.correlation_id,
            label = %ack.label(),
            status = %ack.status(),
            "Acknowledgement accepted"
        );
        tracking.received.push(ack);
        self.settle(&mut tracking)
    }

    /// Fill in timeout entries for every unresolved label whose deadline is at
    /// or before `now`.
    pub fn on_deadline(&self, now: Instant) -> Transition {
        let mut tracking = self.tracking.lock();
        if tracking.state.is_terminal() {
            return Transition::Ignored(IgnoreReason::Terminal);
        }

        let expired: Vec<AcknowledgementLabel> = self
            .slots
            .iter()
            .filter(|slot| slot.deadline <= now && !tracking.has(&slot.label))
            .map(|slot| slot.label.clone())
            .collect();
        if expired.is_empty() {
            return Transition::Pending {
                outstanding: self.outstanding_count(&tracking),
            };
        }

        self.expire(&mut tracking, expired);
        self.settle(&mut tracking)
    }

    /// Finish right now, filling in timeout entries for everything unresolved.
    pub fn cancel(&self) -> Transition {
        let mut tracking = self.tracking.lock();
        if tracking.state.is_terminal() {
            return Transition::Ignored(IgnoreReason::Terminal);
        }

        let unresolved: Vec<AcknowledgementLabel> = self
            .slots
            .iter()
            .filter(|slot| !tracking.has(&slot.label))
            .map(|slot| slot.label.clone())
            .collect();
        self.expire(&mut tracking, unresolved);
        self.settle(&mut tracking)
    }

    fn expire(&self, tracking: &mut Tracking, labels: Vec<AcknowledgementLabel>) {
        for label in labels {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                label = %label,
                "Acknowledgement timed out"
            );
            tracking.received.push(Acknowledgement::timeout(
                label,
                self.entity_id.clone(),
                self.correlation_id.clone(),
            ));
            tracking.synthesized += 1;
        }
    }

    fn outstanding_count(&self, tracking: &Tracking) -> usize {
        self.slots
            .iter()
            .filter(|slot| !tracking.has(&slot.label))
            .count()
    }

    /// Move to a terminal state once every requested label has an entry.
    fn settle(&self, tracking: &mut Tracking) -> Transition {
        let outstanding = self.outstanding_count(tracking);
        if outstanding > 0 {
            return Transition::Pending { outstanding };
        }

        let state = if tracking.synthesized > 0 {
            AggregationState::TimedOut
        } else {
            AggregationState::Completed
        };
        tracking.state = state;

        // Request order, not arrival order.
        let entries: Vec<Acknowledgement> = self
            .slots
            .iter()
            .filter_map(|slot| {
                tracking
                    .received
                    .iter()
                    .find(|ack| ack.label() == &slot.label)
                    .cloned()
            })
            .collect();
        let overall_status = self.merge.merge(self.slots.len(), &entries);

        Transition::Finished(Completion {
            state,
            result: Acknowledgements::new(
                self.entity_id.clone(),
                self.correlation_id.clone(),
                entries,
                overall_status,
            ),
            sink: tracking.sink.take(),
        })
    }
}
