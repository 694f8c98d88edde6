//! The aggregate result handed back to the waiting command.

use serde::{Deserialize, Serialize};

use super::{AckStatus, Acknowledgement, AcknowledgementLabel, CorrelationId};

/// All acknowledgements of one command plus the status derived from them.
///
/// Entries follow request order, one per requested label. Produced exactly
/// once per correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgements {
    entity_id: String,
    correlation_id: CorrelationId,
    acknowledgements: Vec<Acknowledgement>,
    overall_status: AckStatus,
}

impl Acknowledgements {
    pub fn new(
        entity_id: impl Into<String>,
        correlation_id: CorrelationId,
        acknowledgements: Vec<Acknowledgement>,
        overall_status: AckStatus,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            correlation_id,
            acknowledgements,
            overall_status,
        }
    }

    /// The result of a command that requested nothing.
    pub fn empty(entity_id: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(entity_id, correlation_id, Vec::new(), AckStatus::OK)
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn overall_status(&self) -> AckStatus {
        self.overall_status
    }

    pub fn acknowledgements(&self) -> &[Acknowledgement] {
        &self.acknowledgements
    }

    pub fn iter(&self) -> impl Iterator<Item = &Acknowledgement> {
        self.acknowledgements.iter()
    }

    pub fn get(&self, label: &AcknowledgementLabel) -> Option<&Acknowledgement> {
        self.acknowledgements.iter().find(|ack| ack.label() == label)
    }

    pub fn is_successful(&self) -> bool {
        self.overall_status.is_success()
    }

    pub fn successful(&self) -> impl Iterator<Item = &Acknowledgement> {
        self.acknowledgements.iter().filter(|ack| ack.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &Acknowledgement> {
        self.acknowledgements.iter().filter(|ack| !ack.is_success())
    }

    /// Labels that never reported and were filled in with a timeout entry.
    pub fn missing_labels(&self) -> impl Iterator<Item = &AcknowledgementLabel> {
        self.acknowledgements
            .iter()
            .filter(|ack| ack.is_timeout())
            .map(Acknowledgement::label)
    }

    pub fn len(&self) -> usize {
        self.acknowledgements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acknowledgements.is_empty()
    }
}

impl<'a> IntoIterator for &'a Acknowledgements {
    type Item = &'a Acknowledgement;
    type IntoIter = std::slice::Iter<'a, Acknowledgement>;

    fn into_iter(self) -> Self::IntoIter {
        self.acknowledgements.iter()
    }
}
