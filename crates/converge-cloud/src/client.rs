//! Cloud API client abstraction
//!
//! The engine never talks HTTP itself. Everything it needs from the platform
//! goes through [`CloudApiClient`], and every failure comes back as an
//! [`ApiError`] carrying enough detail (HTTP status, error code) to decide
//! whether a retry makes sense.

use crate::action::LifecycleAction;
use crate::history::{HistoryEntry, HistoryPage};
use crate::value::Attributes;
use crate::work_request::WorkRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud API abstraction trait
///
/// Implementations must be safe for concurrent use by independent engine
/// calls. They may share connections but no per-request state.
#[async_trait]
pub trait CloudApiClient: Send + Sync {
    /// Create a resource. Usually answers with a work request to poll.
    async fn create(&self, request: &CreateRequest) -> ApiResult<MutationResponse>;

    /// Read the current attributes of a resource
    async fn read(&self, kind: &str, resource_id: &str) -> ApiResult<Attributes>;

    /// Run a lifecycle action (UPDATE, PRECHECK, UPGRADE, ...) on a resource
    async fn apply_action(&self, request: &ActionRequest) -> ApiResult<MutationResponse>;

    /// Delete a resource, returning the work request if the deletion is asynchronous
    async fn delete(&self, request: &DeleteRequest) -> ApiResult<Option<WorkRequest>>;

    /// Read the current status of a work request
    async fn get_work_request(&self, work_request_id: &str) -> ApiResult<WorkRequest>;

    /// One page of a resource's action history, oldest entry first
    async fn list_history(
        &self,
        kind: &str,
        resource_id: &str,
        page: Option<&str>,
    ) -> ApiResult<HistoryPage>;

    /// A single history entry
    async fn get_history_entry(
        &self,
        kind: &str,
        resource_id: &str,
        entry_id: &str,
    ) -> ApiResult<HistoryEntry>;
}

/// Request to create a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub kind: String,
    pub attributes: Attributes,
    /// Idempotency token, reused across retries of the same call
    pub retry_token: String,
}

impl CreateRequest {
    pub fn new(kind: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            kind: kind.into(),
            attributes,
            retry_token: new_retry_token(),
        }
    }
}

/// Request to run a lifecycle action against an existing resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: String,
    pub resource_id: String,
    pub action: LifecycleAction,
    pub parameters: Attributes,
    pub retry_token: String,
}

impl ActionRequest {
    pub fn new(
        kind: impl Into<String>,
        resource_id: impl Into<String>,
        action: LifecycleAction,
        parameters: Attributes,
    ) -> Self {
        Self {
            kind: kind.into(),
            resource_id: resource_id.into(),
            action,
            parameters,
            retry_token: new_retry_token(),
        }
    }
}

/// Request to delete a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub kind: String,
    pub resource_id: String,
    pub retry_token: String,
}

impl DeleteRequest {
    pub fn new(kind: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            resource_id: resource_id.into(),
            retry_token: new_retry_token(),
        }
    }
}

/// Response to a mutating call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Identifier of the affected resource, when the platform reports it inline
    pub resource_id: Option<String>,
    /// Asynchronous work request tracking the mutation
    pub work_request: Option<WorkRequest>,
}

fn new_retry_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error code the platform uses for missing (or hidden) resources
pub const NOT_FOUND_CODE: &str = "NotAuthorizedOrNotFound";

/// Broad classification of an API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// No HTTP response at all (connection reset, DNS, timeout)
    Network,
    /// 4xx
    Client,
    /// 5xx
    Server,
}

/// Failure reported by the Cloud API client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status, `None` when no response was received
    pub status: Option<u16>,
    /// Machine-readable error code (e.g. `NotAuthorizedOrNotFound`)
    pub code: String,
    pub message: String,
    /// Platform request id, for support tickets
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: "NetworkError".to_string(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, NOT_FOUND_CODE, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status_class(&self) -> StatusClass {
        match self.status {
            None => StatusClass::Network,
            Some(s) if s >= 500 => StatusClass::Server,
            Some(_) => StatusClass::Client,
        }
    }

    /// Network failures, 5xx and 429 are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self.status_class() {
            StatusClass::Network | StatusClass::Server => true,
            StatusClass::Client => self.status == Some(429),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} {}: {}", status, self.code, self.message)?,
            None => write!(f, "{}: {}", self.code, self.message)?,
        }
        if let Some(id) = &self.request_id {
            write!(f, " (request id: {})", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}
