//! In-memory platform error types

use converge_cloud::ApiError;
use thiserror::Error;

/// Rejections the in-memory platform produces on its own
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{kind} {id} not found")]
    ResourceNotFound { kind: String, id: String },

    #[error("Work request not found: {0}")]
    WorkRequestNotFound(String),

    #[error("History entry {entry_id} not found for {resource_id}")]
    HistoryEntryNotFound {
        resource_id: String,
        entry_id: String,
    },

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("{kind} {id} has a work request in progress")]
    Conflict { kind: String, id: String },
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        let message = err.to_string();
        match err {
            PlatformError::ResourceNotFound { .. }
            | PlatformError::WorkRequestNotFound(_)
            | PlatformError::HistoryEntryNotFound { .. } => ApiError::not_found(message),
            PlatformError::InvalidPageToken(_) => ApiError::new(400, "InvalidParameter", message),
            PlatformError::Conflict { .. } => ApiError::new(409, "IncorrectState", message),
        }
    }
}
