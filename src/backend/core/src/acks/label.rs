//! Acknowledgement labels and the label registry.
//!
//! A label names the source of a confirmation. The built-in labels are a
//! closed set owned by the twin infrastructure; everything else is a custom
//! label declared by a consumer and validated by [`LabelRegistry`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use crate::config::AckConfig;
use crate::error::{Result, TwinlinkError};

/// Allowed characters in a label.
static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_:\-]+$").expect("Invalid label regex")
});

/// Labels reserved by the twin infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinLabel {
    /// The twin's persistence store applied the change.
    Persisted,
    /// The search index applied the change.
    Indexed,
    /// A live-channel consumer answered the command.
    LiveResponse,
}

impl BuiltinLabel {
    pub const ALL: [BuiltinLabel; 3] = [Self::Persisted, Self::Indexed, Self::LiveResponse];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Indexed => "indexed",
            Self::LiveResponse => "live-response",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == name)
    }
}

impl fmt::Display for BuiltinLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated acknowledgement label.
///
/// Custom labels can only be produced through [`LabelRegistry`] (or the
/// `FromStr` impl, which uses the default registry), so a `Custom` value never
/// spells a built-in name and equality is plain value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AcknowledgementLabel {
    Builtin(BuiltinLabel),
    Custom(CustomLabel),
}

/// The string payload of a custom label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomLabel(Arc<str>);

impl CustomLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AcknowledgementLabel {
    pub const PERSISTED: Self = Self::Builtin(BuiltinLabel::Persisted);
    pub const INDEXED: Self = Self::Builtin(BuiltinLabel::Indexed);
    pub const LIVE_RESPONSE: Self = Self::Builtin(BuiltinLabel::LiveResponse);

    pub fn as_str(&self) -> &str {
        match self {
            Self::Builtin(builtin) => builtin.as_str(),
            Self::Custom(custom) => custom.as_str(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin(_))
    }
}

impl fmt::Display for AcknowledgementLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BuiltinLabel> for AcknowledgementLabel {
    fn from(builtin: BuiltinLabel) -> Self {
        Self::Builtin(builtin)
    }
}

/// Parsing, and deserialization through it, validates against the default
/// limits. A deployment with a lower `max_label_length` re-checks labels with
/// [`LabelRegistry::check`] where commands enter the system.
impl FromStr for AcknowledgementLabel {
    type Err = TwinlinkError;

    fn from_str(s: &str) -> Result<Self> {
        LabelRegistry::default().validate(s)
    }
}

impl TryFrom<String> for AcknowledgementLabel {
    type Error = TwinlinkError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AcknowledgementLabel> for String {
    fn from(label: AcknowledgementLabel) -> Self {
        label.as_str().to_string()
    }
}

/// Validates label syntax against the configured limits.
///
/// Stateless apart from its limits; the built-in set is fixed.
#[derive(Debug, Clone, Copy)]
pub struct LabelRegistry {
    max_label_length: usize,
}

impl Default for LabelRegistry {
    fn default() -> Self {
        Self::new(AckConfig::default().max_label_length)
    }
}

impl LabelRegistry {
    pub fn new(max_label_length: usize) -> Self {
        Self { max_label_length }
    }

    pub fn from_config(config: &AckConfig) -> Self {
        Self::new(config.max_label_length)
    }

    pub fn max_label_length(&self) -> usize {
        self.max_label_length
    }

    /// Validate a label that may be either built-in or custom.
    pub fn validate(&self, candidate: &str) -> Result<AcknowledgementLabel> {
        if candidate.is_empty() {
            return Err(TwinlinkError::invalid_label(candidate, "label must not be empty"));
        }
        if candidate.chars().count() > self.max_label_length {
            return Err(TwinlinkError::invalid_label(
                candidate,
                format!("label exceeds {} characters", self.max_label_length),
            ));
        }
        if let Some(builtin) = BuiltinLabel::from_name(candidate) {
            return Ok(AcknowledgementLabel::Builtin(builtin));
        }
        if !LABEL_REGEX.is_match(candidate) {
            return Err(TwinlinkError::invalid_label(
                candidate,
                "label may only contain letters, digits, '-', '_' and ':'",
            ));
        }
        Ok(AcknowledgementLabel::Custom(CustomLabel(Arc::from(candidate))))
    }

    /// Re-check an already parsed label against this registry's length limit.
    pub fn check(&self, label: &AcknowledgementLabel) -> Result<()> {
        let candidate = label.as_str();
        if candidate.chars().count() > self.max_label_length {
            return Err(TwinlinkError::invalid_label(
                candidate,
                format!("label exceeds {} characters", self.max_label_length),
            ));
        }
        Ok(())
    }

    /// Validate a label a consumer wants to declare as its own.
    pub fn validate_custom(&self, candidate: &str) -> Result<AcknowledgementLabel> {
        match self.validate(candidate)? {
            AcknowledgementLabel::Builtin(_) => Err(TwinlinkError::reserved_label(candidate)),
            custom => Ok(custom),
        }
    }

    pub fn is_builtin(&self, label: &AcknowledgementLabel) -> bool {
        label.is_builtin()
    }

    pub fn builtins(&self) -> impl Iterator<Item = AcknowledgementLabel> {
        BuiltinLabel::ALL.into_iter().map(AcknowledgementLabel::Builtin)
    }
}
