//! Error taxonomy for the operator
//!
//! Failures are classified at the platform boundary so the reconciliation
//! loop can decide what to retry:
//! - `InvalidSpec` - malformed desired input, never retried
//! - `Materialization` - the platform rejected a submitted descriptor
//!   (dry run or apply), surfaced without retry within the same pass
//! - `Conflict` - concurrent modification, left to the next pass
//! - `Transport` - connectivity/timeout, retried with bounded backoff

use thiserror::Error;

/// Operator error taxonomy
#[derive(Debug, Error)]
pub enum OperatorError {
    /// The custom resource's desired state is malformed
    #[error("invalid spec for {identity}: {reason}")]
    InvalidSpec { identity: String, reason: String },

    /// The platform rejected a submitted workload descriptor
    #[error("descriptor rejected by the platform: {reason}")]
    Materialization { reason: String },

    /// Concurrent modification detected on apply or patch
    #[error("conflicting write: {reason}")]
    Conflict { reason: String },

    /// Connectivity or timeout failure talking to the platform
    #[error("platform transport failure: {reason}")]
    Transport { reason: String },

    /// Descriptor or rule-document rendering failed
    #[error("document serialization failure: {reason}")]
    Serialization { reason: String },
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl OperatorError {
    /// Shorthand for an invalid-spec failure
    pub fn invalid_spec(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            identity: identity.into(),
            reason: reason.into(),
        }
    }

    /// Whether the loop may retry this failure with backoff in the same pass
    pub fn is_retryable(&self) -> bool {
        matches!(self, OperatorError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(OperatorError::Transport {
            reason: "timeout".into()
        }
        .is_retryable());

        assert!(!OperatorError::invalid_spec("logs/ns1", "empty image").is_retryable());
        assert!(!OperatorError::Materialization {
            reason: "rejected".into()
        }
        .is_retryable());
        assert!(!OperatorError::Conflict {
            reason: "resource version changed".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_display_carries_identity() {
        let err = OperatorError::invalid_spec("logs/ns1", "negative replicas");
        assert!(err.to_string().contains("logs/ns1"));
        assert!(err.to_string().contains("negative replicas"));
    }
}
