//! In-memory cloud platform for converge
//!
//! This crate implements [`CloudApiClient`](converge_cloud::CloudApiClient)
//! without any network: resources, work requests and action history live
//! in process memory. Work request progress is scripted so tests can drive
//! the engine through every status path deterministically.
//!
//! # Features
//!
//! - Scripted work requests (standard, immediate, stuck, failed, canceled)
//! - Fault injection per operation, before or after the mutation commits
//! - Retry-token idempotency for create and action requests
//! - Paged action history
//! - Call counters
//!
//! # Example
//!
//! ```ignore
//! use converge_cloud::{DesiredState, Engine, resources};
//! use converge_cloud_memory::{InMemoryCloud, WorkRequestScript};
//! use std::sync::Arc;
//!
//! let cloud = Arc::new(InMemoryCloud::new());
//! cloud.push_script(WorkRequestScript::immediate()).await;
//!
//! let engine = Engine::with_default_config(cloud.clone());
//! let cluster = resources::autonomous_vm_cluster::descriptor();
//! let state = engine.create(&cluster, &desired).await?;
//! ```

pub mod error;
pub mod platform;

pub use error::PlatformError;
pub use platform::{InMemoryCloud, Operation, WorkRequestScript};
