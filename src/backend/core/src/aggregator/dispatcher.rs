//! Aggregator registry and dispatcher.
//!
//! The [`Dispatcher`] owns the map from correlation id to live [`Aggregator`],
//! starts a deadline task per aggregation, routes inbound acknowledgements and
//! reclaims entries when an aggregation finishes. It is cheap to clone; all
//! clones share one registry.
//!
//! Reclamation order is fixed: the registry entry is removed, then the
//! deadline task is stopped, then the result is delivered. An acknowledgement
//! arriving after delivery therefore always finds "unknown id".

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::merge::{SeverityMerge, StatusMerge};
use super::state::{AggregationState, Aggregator, Completion, IgnoreReason, Transition};
use super::PendingAcknowledgements;
use crate::acks::{Acknowledgement, Acknowledgements, CorrelationId, LabelRegistry, RequestSet};
use crate::config::AckConfig;
use crate::error::{Result, TwinlinkError};
use crate::telemetry::metrics::AckMetrics;

/// A command that has passed validation and is about to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    entity_id: String,
    correlation_id: CorrelationId,
}

impl Command {
    pub fn new(entity_id: impl Into<String>, correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

/// What happened to a routed acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Recorded; the aggregation is still waiting for other labels.
    Accepted,
    /// Recorded and it was the last outstanding label.
    Completed,
    /// The aggregation exists but did not take the acknowledgement.
    Ignored(IgnoreReason),
    /// No aggregation is registered for the correlation id.
    Stale,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub open: usize,
    pub submitted: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub stale_arrivals: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    stale_arrivals: AtomicU64,
}

struct RegistryEntry {
    aggregator: Arc<Aggregator>,
    deadline: CancellationToken,
}

struct DispatcherInner {
    config: AckConfig,
    merge: Arc<dyn StatusMerge>,
    registry: DashMap<CorrelationId, RegistryEntry>,
    counters: Counters,
}

/// Routes acknowledgements to the aggregation that owns their correlation id.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("merge", &self.inner.merge)
            .field("open", &self.inner.registry.len())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher using the default merge policy.
    pub fn new(config: AckConfig) -> Self {
        Self::with_merge(config, Arc::new(SeverityMerge))
    }

    /// Create a dispatcher with a custom overall-status policy.
    pub fn with_merge(config: AckConfig, merge: Arc<dyn StatusMerge>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                merge,
                registry: DashMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &AckConfig {
        &self.inner.config
    }

    /// Start tracking acknowledgements for a command.
    ///
    /// An empty request set resolves immediately without opening an
    /// aggregation. Otherwise an aggregation is registered under the command's
    /// correlation id and its deadline starts now. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `TooManyLabels` if the set exceeds the configured `max_labels`
    /// - `InvalidLabel` if a label exceeds the configured `max_label_length`
    /// - `DuplicateCorrelationId` if an aggregation is already open for the id
    pub fn submit(&self, command: &Command, requests: RequestSet) -> Result<PendingAcknowledgements> {
        if requests.is_empty() {
            return Ok(PendingAcknowledgements::ready(Acknowledgements::empty(
                command.entity_id(),
                command.correlation_id().clone(),
            )));
        }

        if let Err(error) = self.admit(&requests) {
            error.log();
            return Err(error);
        }

        let (aggregator, pending, deadline) = match self.inner.registry.entry(command.correlation_id().clone()) {
            Entry::Occupied(_) => {
                let error = TwinlinkError::duplicate_correlation_id(command.correlation_id());
                error.log();
                return Err(error);
            }
            Entry::Vacant(slot) => {
                let (aggregator, pending) = Aggregator::open(
                    Arc::new(requests),
                    command.entity_id(),
                    command.correlation_id().clone(),
                    Instant::now(),
                    self.inner.merge.clone(),
                );
                let aggregator = Arc::new(aggregator);
                let deadline = CancellationToken::new();
                slot.insert(RegistryEntry {
                    aggregator: aggregator.clone(),
                    deadline: deadline.clone(),
                });
                (aggregator, pending, deadline)
            }
        };

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        AckMetrics::aggregation_started(aggregator.requests().len());
        AckMetrics::set_open(self.inner.registry.len());
        tracing::info!(
            correlation_id = %aggregator.correlation_id(),
            entity_id = %aggregator.entity_id(),
            requested = %aggregator.requests().to_header_value(),
            "Acknowledgement aggregation opened"
        );

        self.spawn_deadline(aggregator, deadline);
        Ok(pending)
    }

    /// Deliver a consumer's acknowledgement to its aggregation.
    ///
    /// Acknowledgements for unknown or already finished correlation ids are
    /// dropped and counted; they are never an error for the sender.
    pub fn route_acknowledgement(&self, ack: Acknowledgement) -> RouteOutcome {
        let aggregator = self
            .inner
            .registry
            .get(ack.correlation_id())
            .map(|entry| entry.aggregator.clone());

        let Some(aggregator) = aggregator else {
            self.inner.counters.stale_arrivals.fetch_add(1, Ordering::Relaxed);
            AckMetrics::stale_arrival(ack.label());
            tracing::debug!(
                correlation_id = %ack.correlation_id(),
                label = %ack.label(),
                "Acknowledgement for unknown correlation id dropped"
            );
            return RouteOutcome::Stale;
        };

        match aggregator.accept(ack) {
            Transition::Ignored(reason) => {
                AckMetrics::ignored(reason.as_str());
                RouteOutcome::Ignored(reason)
            }
            Transition::Pending { .. } => RouteOutcome::Accepted,
            Transition::Finished(completion) => {
                self.finish(&aggregator, completion, false);
                RouteOutcome::Completed
            }
        }
    }

    /// Tear down an open aggregation before its deadline.
    ///
    /// Unresolved labels are filled in with timeout entries and the waiting
    /// command receives the result right away. Returns `false` if no
    /// aggregation was open for the id.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let aggregator = self
            .inner
            .registry
            .get(correlation_id)
            .map(|entry| entry.aggregator.clone());

        let Some(aggregator) = aggregator else {
            return false;
        };

        match aggregator.cancel() {
            Transition::Finished(completion) => {
                self.finish(&aggregator, completion, true);
                true
            }
            _ => false,
        }
    }

    /// Cancel every open aggregation. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<CorrelationId> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let cancelled = ids.iter().filter(|id| self.cancel(id)).count();
        tracing::info!(cancelled, "Dispatcher shut down");
        cancelled
    }

    pub fn is_open(&self, correlation_id: &CorrelationId) -> bool {
        self.inner.registry.contains_key(correlation_id)
    }

    pub fn open_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.inner.counters;
        DispatcherStats {
            open: self.inner.registry.len(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            stale_arrivals: counters.stale_arrivals.load(Ordering::Relaxed),
        }
    }

    /// Request sets may have been built under other limits or decoded from
    /// the wire, so they are checked against this dispatcher's config.
    fn admit(&self, requests: &RequestSet) -> Result<()> {
        let config = &self.inner.config;
        if requests.len() > config.max_labels {
            return Err(TwinlinkError::too_many_labels(requests.len(), config.max_labels));
        }
        let registry = LabelRegistry::from_config(config);
        requests.labels().try_for_each(|label| registry.check(label))
    }

    fn spawn_deadline(&self, aggregator: Arc<Aggregator>, stop: CancellationToken) {
        let dispatcher = self.clone();
        let span = tracing::info_span!(
            "aggregation",
            correlation_id = %aggregator.correlation_id(),
            entity_id = %aggregator.entity_id(),
        );
        tokio::spawn(
            async move {
                while let Some(deadline) = aggregator.next_deadline() {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep_until(deadline) => {}
                    }

                    if let Transition::Finished(completion) = aggregator.on_deadline(Instant::now()) {
                        dispatcher.finish(&aggregator, completion, false);
                        return;
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Reclaim the registry slot, then deliver.
    fn finish(&self, aggregator: &Arc<Aggregator>, completion: Completion, cancelled: bool) {
        let removed = self
            .inner
            .registry
            .remove_if(aggregator.correlation_id(), |_, entry| {
                Arc::ptr_eq(&entry.aggregator, aggregator)
            });
        if let Some((_, entry)) = removed {
            entry.deadline.cancel();
        }

        let counters = &self.inner.counters;
        let outcome = match completion.state() {
            _ if cancelled => {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                "cancelled"
            }
            AggregationState::Completed => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                "completed"
            }
            _ => {
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                "timed_out"
            }
        };

        let elapsed = aggregator.opened_at().elapsed();
        AckMetrics::aggregation_finished(outcome, completion.result().overall_status().as_u16(), elapsed);
        AckMetrics::set_open(self.inner.registry.len());
        tracing::info!(
            correlation_id = %aggregator.correlation_id(),
            state = %completion.state(),
            outcome,
            overall_status = %completion.result().overall_status(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Acknowledgement aggregation finished"
        );

        if !completion.deliver() {
            tracing::debug!(
                correlation_id = %aggregator.correlation_id(),
                "Aggregate result dropped, nobody is waiting"
            );
        }
    }
}
