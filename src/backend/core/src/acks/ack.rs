//! A single consumer's verdict for one correlation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{AckStatus, AcknowledgementLabel};

/// Caller-assigned identifier linking a command to its acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id for callers that do not carry their own.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One consumer's acknowledgement of one command.
///
/// Immutable once built; two acknowledgements are equal iff every field is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    label: AcknowledgementLabel,
    entity_id: String,
    correlation_id: CorrelationId,
    status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    /// Set only on entries the aggregator filled in for a missed deadline.
    #[serde(default, skip_serializing_if = "is_false")]
    expired: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Acknowledgement {
    pub fn new(
        label: AcknowledgementLabel,
        entity_id: impl Into<String>,
        correlation_id: impl Into<CorrelationId>,
        status: impl Into<AckStatus>,
    ) -> Self {
        Self {
            label,
            entity_id: entity_id.into(),
            correlation_id: correlation_id.into(),
            status: status.into(),
            payload: None,
            headers: BTreeMap::new(),
            expired: false,
        }
    }

    /// The failure entry manufactured for a label that did not report in time.
    ///
    /// Unlike a consumer that itself reports 408, it is marked as expired.
    pub fn timeout(
        label: AcknowledgementLabel,
        entity_id: impl Into<String>,
        correlation_id: impl Into<CorrelationId>,
    ) -> Self {
        Self {
            expired: true,
            ..Self::new(label, entity_id, correlation_id, AckStatus::REQUEST_TIMEOUT)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn label(&self) -> &AcknowledgementLabel {
        &self.label
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn status(&self) -> AckStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// True only for entries filled in because the label missed its deadline.
    pub fn is_timeout(&self) -> bool {
        self.expired
    }
}
