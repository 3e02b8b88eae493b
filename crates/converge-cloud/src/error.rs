//! Reconciliation error types

use crate::client::ApiError;
use crate::work_request::WorkRequestStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the reconciliation engine
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Malformed or missing input. Never retried.
    #[error("Invalid {kind}.{attribute}: {reason}")]
    Validation {
        kind: String,
        attribute: String,
        reason: String,
    },

    /// Network / 5xx / throttling failures that outlasted the retry budget
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    TransientFailure {
        operation: String,
        attempts: u32,
        last_error: ApiError,
    },

    #[error(
        "Work request {work_request_id} did not reach a terminal state within {timeout:?} (last status: {last_status}, {reads} status reads)"
    )]
    PollTimeout {
        work_request_id: String,
        last_status: WorkRequestStatus,
        timeout: Duration,
        reads: u32,
    },

    /// The platform finished the work request as FAILED or CANCELED
    #[error("Work request {work_request_id} ended {status}: {reason}")]
    Reconciliation {
        work_request_id: String,
        status: WorkRequestStatus,
        reason: String,
    },

    /// Non-retryable API response (4xx other than throttling)
    #[error("{operation} rejected by the API: {source}")]
    Api {
        operation: String,
        #[source]
        source: ApiError,
    },

    #[error("State error: {0}")]
    State(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ReconcileError {
    pub fn validation(
        kind: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ReconcileError::Validation {
            kind: kind.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Validation { .. } => "validation",
            ReconcileError::TransientFailure { .. } => "transient_failure",
            ReconcileError::PollTimeout { .. } => "poll_timeout",
            ReconcileError::Reconciliation { .. } => "reconciliation",
            ReconcileError::Api { .. } => "api",
            ReconcileError::State(_) | ReconcileError::Lock(_) => "state",
            ReconcileError::Config(_) => "config",
            ReconcileError::Io(_) => "io",
            ReconcileError::Json(_) | ReconcileError::Yaml(_) => "serialization",
        }
    }

    /// The API error behind this failure, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ReconcileError::TransientFailure { last_error, .. } => Some(last_error),
            ReconcileError::Api { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Api { source, .. } if source.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_detail() {
        let err = ReconcileError::PollTimeout {
            work_request_id: "wr-1".to_string(),
            last_status: WorkRequestStatus::InProgress,
            timeout: Duration::from_secs(10),
            reads: 11,
        };
        let msg = err.to_string();
        assert!(msg.contains("wr-1"));
        assert!(msg.contains("IN_PROGRESS"));
        assert_eq!(err.kind(), "poll_timeout");
    }

    #[test]
    fn test_not_found_detection() {
        let err = ReconcileError::Api {
            operation: "delete".to_string(),
            source: ApiError::not_found("gone"),
        };
        assert!(err.is_not_found());
        assert!(err.api_error().is_some());
        assert!(!ReconcileError::validation("k", "a", "r").is_not_found());
    }
}
