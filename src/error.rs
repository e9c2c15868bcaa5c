// src/error.rs
// Caller-visible error taxonomy. Internal plumbing stays on anyhow; these
// types exist so batch result slots can carry matchable, cloneable kinds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid query: {reason}")]
    Validation { reason: String },

    #[error("embedding provider timed out after {duration_ms}ms")]
    ProviderTimeout { duration_ms: u64 },

    #[error("matching timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("reference store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("classifier rejected feature vector: {reason}")]
    Classifier { reason: String },

    #[error("cancelled before dispatch")]
    Cancelled,
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatchError::Validation { .. } => ErrorKind::Validation,
            MatchError::ProviderTimeout { .. } => ErrorKind::ProviderTimeout,
            MatchError::Timeout { .. } => ErrorKind::Timeout,
            MatchError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            MatchError::Classifier { .. } => ErrorKind::Classifier,
            MatchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Discriminant carried in per-item result slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    ProviderTimeout,
    Timeout,
    StoreUnavailable,
    Classifier,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Classifier => "classifier",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_their_errors() {
        let e = MatchError::Timeout { duration_ms: 5000 };
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert_eq!(e.to_string(), "matching timed out after 5000ms");

        let e = MatchError::StoreUnavailable {
            reason: "connection refused".to_string(),
        };
        assert_eq!(e.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn kind_serializes_as_enum_name() {
        let json = serde_json::to_string(&ErrorKind::ProviderTimeout).unwrap();
        assert_eq!(json, "\"ProviderTimeout\"");
    }
}
