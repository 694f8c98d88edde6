//! HTTP-semantics status codes carried by acknowledgements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an acknowledgement: 2xx is success, anything else a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckStatus(u16);

impl AckStatus {
    pub const OK: Self = Self(200);
    pub const CREATED: Self = Self(201);
    pub const ACCEPTED: Self = Self(202);
    pub const NO_CONTENT: Self = Self(204);
    pub const BAD_REQUEST: Self = Self(400);
    pub const FORBIDDEN: Self = Self(403);
    pub const NOT_FOUND: Self = Self(404);
    /// Status of the synthetic entry produced for a label that never reported.
    pub const REQUEST_TIMEOUT: Self = Self(408);
    pub const CONFLICT: Self = Self(409);
    pub const PRECONDITION_FAILED: Self = Self(412);
    pub const FAILED_DEPENDENCY: Self = Self(424);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    pub const GATEWAY_TIMEOUT: Self = Self(504);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn is_success(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    pub const fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub const fn is_timeout(&self) -> bool {
        self.0 == Self::REQUEST_TIMEOUT.0
    }

    pub const fn is_server_error(&self) -> bool {
        self.0 >= 500 && self.0 < 600
    }
}

impl From<u16> for AckStatus {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(AckStatus::OK.is_success());
        assert!(AckStatus::NO_CONTENT.is_success());
        assert!(AckStatus::new(299).is_success());
        assert!(AckStatus::new(199).is_failure());
        assert!(AckStatus::new(302).is_failure());
        assert!(AckStatus::BAD_REQUEST.is_failure());
    }

    #[test]
    fn test_timeout_is_failure() {
        assert!(AckStatus::REQUEST_TIMEOUT.is_timeout());
        assert!(AckStatus::REQUEST_TIMEOUT.is_failure());
        assert!(!AckStatus::GATEWAY_TIMEOUT.is_timeout());
    }

    #[test]
    fn test_serializes_as_number() {
        assert_eq!(serde_json::to_string(&AckStatus::CONFLICT).unwrap(), "409");
        let parsed: AckStatus = serde_json::from_str("503").unwrap();
        assert_eq!(parsed, AckStatus::SERVICE_UNAVAILABLE);
    }
}
