//! Per-command acknowledgement requests.
//!
//! A [`RequestSet`] says which labels must report for one command and how
//! long each of them may take. It is validated once, when the command is
//! built, and is immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{AcknowledgementLabel, LabelRegistry};
use crate::config::AckConfig;
use crate::error::{Result, TwinlinkError};

/// Header carrying the requested labels as a comma-separated list.
pub const REQUESTED_ACKS_HEADER: &str = "requested-acks";

/// One requested label with an optional timeout override.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcknowledgementRequest {
    label: AcknowledgementLabel,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    timeout: Option<Duration>,
}

impl AcknowledgementRequest {
    pub fn new(label: AcknowledgementLabel) -> Self {
        Self { label, timeout: None }
    }

    pub fn with_timeout(label: AcknowledgementLabel, timeout: Duration) -> Self {
        Self {
            label,
            timeout: Some(timeout),
        }
    }

    pub fn label(&self) -> &AcknowledgementLabel {
        &self.label
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl From<AcknowledgementLabel> for AcknowledgementRequest {
    fn from(label: AcknowledgementLabel) -> Self {
        Self::new(label)
    }
}

/// Parses the textual form, which is just the label.
impl FromStr for AcknowledgementRequest {
    type Err = TwinlinkError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self::new(s.trim().parse()?))
    }
}

impl fmt::Display for AcknowledgementRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.label, f)
    }
}

/// The ordered, duplicate-free set of labels one command waits for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSet {
    requests: Vec<AcknowledgementRequest>,
    #[serde(with = "humantime_serde")]
    default_timeout: Duration,
}

impl RequestSet {
    /// A set that requests nothing; commands carrying it never open an aggregation.
    pub fn empty(default_timeout: Duration) -> Self {
        Self {
            requests: Vec::new(),
            default_timeout,
        }
    }

    /// Build a set from labels in request order.
    ///
    /// Fails with `TooManyLabels` if more than `max_labels` are requested and
    /// with `DuplicateLabel` if a label appears twice.
    pub fn build(
        labels: impl IntoIterator<Item = AcknowledgementLabel>,
        per_label_timeouts: &HashMap<AcknowledgementLabel, Duration>,
        default_timeout: Duration,
        max_labels: usize,
    ) -> Result<Self> {
        let requests = labels
            .into_iter()
            .map(|label| match per_label_timeouts.get(&label) {
                Some(timeout) => AcknowledgementRequest::with_timeout(label, *timeout),
                None => AcknowledgementRequest::new(label),
            })
            .collect();
        Self::from_requests(requests, default_timeout, max_labels)
    }

    /// Build a set from explicit requests under the label limit.
    pub fn from_requests(
        requests: Vec<AcknowledgementRequest>,
        default_timeout: Duration,
        max_labels: usize,
    ) -> Result<Self> {
        if requests.len() > max_labels {
            return Err(TwinlinkError::too_many_labels(requests.len(), max_labels));
        }
        let mut seen = HashSet::with_capacity(requests.len());
        for request in &requests {
            if !seen.insert(request.label()) {
                return Err(TwinlinkError::duplicate_label(request.label().as_str()));
            }
        }
        Ok(Self {
            requests,
            default_timeout,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &AcknowledgementLabel> + '_ {
        self.requests.iter().map(AcknowledgementRequest::label)
    }

    pub fn requests(&self) -> &[AcknowledgementRequest] {
        &self.requests
    }

    /// Effective timeout for a requested label, or `None` if it was not requested.
    pub fn timeout_for(&self, label: &AcknowledgementLabel) -> Option<Duration> {
        self.requests
            .iter()
            .find(|r| r.label() == label)
            .map(|r| r.timeout().unwrap_or(self.default_timeout))
    }

    /// The longest effective timeout, i.e. when the whole aggregation gives up.
    pub fn max_timeout(&self) -> Option<Duration> {
        self.requests
            .iter()
            .map(|r| r.timeout().unwrap_or(self.default_timeout))
            .max()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn contains(&self, label: &AcknowledgementLabel) -> bool {
        self.requests.iter().any(|r| r.label() == label)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Render the labels the way they travel in the `requested-acks` header.
    pub fn to_header_value(&self) -> String {
        self.labels()
            .map(AcknowledgementLabel::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Builds request sets under the configured limits.
#[derive(Debug, Clone)]
pub struct RequestSetBuilder {
    registry: LabelRegistry,
    max_labels: usize,
    default_timeout: Duration,
    requests: Vec<AcknowledgementRequest>,
}

impl RequestSetBuilder {
    pub fn new(config: &AckConfig) -> Self {
        Self {
            registry: LabelRegistry::from_config(config),
            max_labels: config.max_labels,
            default_timeout: config.default_timeout,
            requests: Vec::new(),
        }
    }

    /// Override the command-level default timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn request(mut self, label: AcknowledgementLabel) -> Self {
        self.requests.push(AcknowledgementRequest::new(label));
        self
    }

    pub fn request_with_timeout(mut self, label: AcknowledgementLabel, timeout: Duration) -> Self {
        self.requests
            .push(AcknowledgementRequest::with_timeout(label, timeout));
        self
    }

    pub fn requests(mut self, requests: impl IntoIterator<Item = AcknowledgementRequest>) -> Self {
        self.requests.extend(requests);
        self
    }

    /// Add labels parsed from a `requested-acks` header value.
    ///
    /// Empty segments are skipped, so `""` requests nothing.
    pub fn parse_header(mut self, value: &str) -> Result<Self> {
        for segment in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let label = self.registry.validate(segment)?;
            self.requests.push(AcknowledgementRequest::new(label));
        }
        Ok(self)
    }

    /// Labels added through [`request`](Self::request) or
    /// [`requests`](Self::requests) are checked against the configured length
    /// limit here, since parsing them on their own only applies the default.
    pub fn build(self) -> Result<RequestSet> {
        for request in &self.requests {
            self.registry.check(request.label())?;
        }
        RequestSet::from_requests(self.requests, self.default_timeout, self.max_labels)
    }
}
