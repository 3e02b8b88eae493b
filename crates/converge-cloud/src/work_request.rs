//! Asynchronous work requests

use crate::closed_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

closed_enum! {
    /// Status of a work request
    ///
    /// `ACCEPTED → IN_PROGRESS (→ CANCELING) → {SUCCEEDED, FAILED, CANCELED}`
    pub enum WorkRequestStatus {
        Accepted => "ACCEPTED",
        InProgress => "IN_PROGRESS",
        Canceling => "CANCELING",
        Succeeded => "SUCCEEDED",
        Failed => "FAILED",
        Canceled => "CANCELED",
    }
}

impl WorkRequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkRequestStatus::Succeeded | WorkRequestStatus::Failed | WorkRequestStatus::Canceled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            WorkRequestStatus::Accepted => 0,
            WorkRequestStatus::InProgress => 1,
            WorkRequestStatus::Canceling => 2,
            _ => 3,
        }
    }

    /// Whether `next` is a legal successor of `self`. Re-reading the same
    /// status is always legal; nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: WorkRequestStatus) -> bool {
        if self.is_terminal() {
            return next == *self;
        }
        next.rank() >= self.rank()
    }
}

/// A resource touched by a work request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequestResource {
    /// Resource kind (e.g. "autonomous_vm_cluster")
    pub entity_type: String,
    /// Resource identifier
    pub identifier: String,
    /// What happened to it (CREATED, UPDATED, DELETED, IN_PROGRESS, ...)
    pub action_type: String,
}

/// Error reported by the platform for a work request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequestError {
    pub code: String,
    pub message: String,
}

/// Handle for an asynchronous mutating operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub id: String,

    /// Operation name (e.g. "CREATE_AUTONOMOUS_VM_CLUSTER")
    pub operation_type: String,

    pub status: WorkRequestStatus,

    pub percent_complete: f32,

    /// Resources affected by the operation
    pub resources: Vec<WorkRequestResource>,

    /// Errors reported for a FAILED or CANCELED request
    pub errors: Vec<WorkRequestError>,

    pub time_accepted: DateTime<Utc>,

    pub time_finished: Option<DateTime<Utc>>,
}

impl WorkRequest {
    pub fn new(
        id: impl Into<String>,
        operation_type: impl Into<String>,
        status: WorkRequestStatus,
    ) -> Self {
        Self {
            id: id.into(),
            operation_type: operation_type.into(),
            status,
            percent_complete: 0.0,
            resources: Vec::new(),
            errors: Vec::new(),
            time_accepted: Utc::now(),
            time_finished: None,
        }
    }

    pub fn with_resource(
        mut self,
        entity_type: impl Into<String>,
        identifier: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        self.resources.push(WorkRequestResource {
            entity_type: entity_type.into(),
            identifier: identifier.into(),
            action_type: action_type.into(),
        });
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Identifier of the first affected resource of the given kind
    pub fn resource_identifier(&self, entity_type: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|r| r.entity_type == entity_type)
            .map(|r| r.identifier.as_str())
    }

    /// Platform-reported reason for a failed or canceled request
    pub fn failure_reason(&self) -> String {
        if self.errors.is_empty() {
            return format!("work request {} ended {} without a reason", self.id, self.status);
        }
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
