//! Converge resource reconciliation engine
//!
//! This crate drives cloud resources through their lifecycle against an
//! eventually-consistent platform API: create, poll the returned work
//! request until it settles, apply updates and kind-specific actions, and
//! delete. Resource kinds are plain data ([`ResourceDescriptor`]); the
//! platform is reached only through the [`CloudApiClient`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Host (Terraform provider)           │
//! └─────────────────┬───────────────────────────────┘
//!                   │ DesiredState / ResourceDescriptor
//! ┌─────────────────▼───────────────────────────────┐
//! │                converge-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   Engine: create / action / update /     │   │
//! │  │           delete / history / reconcile   │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Poll + Retry │  │  State Store │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │ trait CloudApiClient
//! ┌───────▼───────┐
//! │ platform SDK  │  (converge-cloud-memory for tests)
//! └───────────────┘
//! ```

pub mod action;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod desired;
pub mod duration;
pub mod engine;
pub mod enums;
pub mod error;
pub mod history;
pub mod logging;
pub mod poll;
pub mod resources;
pub mod retry;
pub mod state;
pub mod value;
pub mod work_request;

// Re-exports
pub use action::{AttributeChange, ChangeKind, LifecycleAction, Plan};
pub use client::{
    ActionRequest, ApiError, ApiResult, CloudApiClient, CreateRequest, DeleteRequest,
    MutationResponse, NOT_FOUND_CODE, StatusClass,
};
pub use config::{EngineConfig, OperationTimeouts};
pub use descriptor::{
    ActionSchema, AttrType, AttributeSchema, Condition, Mutability, ResourceDescriptor,
};
pub use desired::{ConfigurationSource, DesiredState};
pub use duration::{format_duration, parse_duration};
pub use engine::{Engine, ReconcileOutcome};
pub use enums::{ClosedEnum, UnknownVariant, parse_enum};
pub use error::{ReconcileError, Result};
pub use history::{HistoryEntry, HistoryPage, HistoryState};
pub use poll::{PollOptions, poll_work_request};
pub use retry::{BackoffPolicy, retry_transient, retry_transient_until};
pub use state::{FileStateStore, MemoryStateStore, ObservedState, StateFile, StateStore};
pub use value::{AttrValue, Attributes, Setting};
pub use work_request::{WorkRequest, WorkRequestError, WorkRequestResource, WorkRequestStatus};
