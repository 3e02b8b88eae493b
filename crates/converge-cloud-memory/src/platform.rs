//! Scripted in-memory platform
//!
//! Every mutation returns a work request whose progress follows a
//! [`WorkRequestScript`]: each status read advances one step, and the
//! mutation takes effect when the request turns terminal.

use crate::error::PlatformError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_cloud::{
    ActionRequest, ApiError, ApiResult, AttrValue, Attributes, ClosedEnum, CloudApiClient,
    CreateRequest, DeleteRequest, HistoryEntry, HistoryPage, HistoryState, LifecycleAction,
    MutationResponse, WorkRequest, WorkRequestError, WorkRequestStatus,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Client call, as counted by [`InMemoryCloud::calls`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    ApplyAction,
    Delete,
    GetWorkRequest,
    ListHistory,
    GetHistoryEntry,
}

/// Sequence of statuses a work request reports, one per status read.
/// The last status repeats once the script runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkRequestScript {
    statuses: Vec<WorkRequestStatus>,
    /// Status of the mutation response when it differs from the first read
    initial: Option<WorkRequestStatus>,
    reason: Option<String>,
    synchronous: bool,
}

impl WorkRequestScript {
    pub fn new(statuses: impl IntoIterator<Item = WorkRequestStatus>) -> Self {
        let mut statuses: Vec<_> = statuses.into_iter().collect();
        if statuses.is_empty() {
            statuses.push(WorkRequestStatus::Succeeded);
        }
        Self {
            statuses,
            initial: None,
            reason: None,
            synchronous: false,
        }
    }

    /// Report `status` in the mutation response; status reads still start
    /// at the first scripted status
    pub fn answering(mut self, status: WorkRequestStatus) -> Self {
        self.initial = Some(status);
        self
    }

    /// ACCEPTED, IN_PROGRESS, SUCCEEDED
    pub fn standard() -> Self {
        Self::new([
            WorkRequestStatus::Accepted,
            WorkRequestStatus::InProgress,
            WorkRequestStatus::Succeeded,
        ])
    }

    /// Work request already SUCCEEDED when the mutation returns
    pub fn immediate() -> Self {
        Self::new([WorkRequestStatus::Succeeded])
    }

    /// Stuck IN_PROGRESS forever
    pub fn never_finishes() -> Self {
        Self::new([WorkRequestStatus::Accepted, WorkRequestStatus::InProgress])
    }

    /// Ends FAILED with `reason`
    pub fn fails(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new([
                WorkRequestStatus::Accepted,
                WorkRequestStatus::InProgress,
                WorkRequestStatus::Failed,
            ])
        }
    }

    pub fn canceled() -> Self {
        Self {
            reason: Some("canceled by operator".to_string()),
            ..Self::new([
                WorkRequestStatus::Accepted,
                WorkRequestStatus::InProgress,
                WorkRequestStatus::Canceling,
                WorkRequestStatus::Canceled,
            ])
        }
    }

    /// No work request at all: the mutation completes inline
    pub fn synchronous() -> Self {
        Self {
            synchronous: true,
            ..Self::immediate()
        }
    }

    fn status_at(&self, step: usize) -> WorkRequestStatus {
        self.statuses[step.min(self.statuses.len() - 1)]
    }

    fn percent_at(&self, step: usize) -> f32 {
        let last = self.statuses.len().saturating_sub(1).max(1);
        (step.min(last) as f32 / last as f32) * 100.0
    }
}

impl Default for WorkRequestScript {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone)]
struct Fault {
    error: ApiError,
    after_commit: bool,
}

#[derive(Debug, Clone)]
enum Effect {
    Create {
        kind: String,
        id: String,
    },
    Action {
        kind: String,
        id: String,
        action: LifecycleAction,
        parameters: Attributes,
        started: DateTime<Utc>,
    },
    Delete {
        kind: String,
        id: String,
    },
}

impl Effect {
    fn targets(&self, kind: &str, id: &str) -> bool {
        match self {
            Effect::Create { kind: k, id: i }
            | Effect::Action { kind: k, id: i, .. }
            | Effect::Delete { kind: k, id: i } => k == kind && i == id,
        }
    }
}

#[derive(Debug)]
struct TrackedWorkRequest {
    work_request: WorkRequest,
    script: WorkRequestScript,
    reads: usize,
    /// Taken when the request turns terminal
    effect: Option<Effect>,
}

type ResourceKey = (String, String);

fn key(kind: &str, id: &str) -> ResourceKey {
    (kind.to_string(), id.to_string())
}

#[derive(Debug, Default)]
struct Platform {
    resources: HashMap<ResourceKey, Attributes>,
    history: HashMap<ResourceKey, Vec<HistoryEntry>>,
    work_requests: HashMap<String, TrackedWorkRequest>,
    scripts: VecDeque<WorkRequestScript>,
    default_script: WorkRequestScript,
    faults: HashMap<Operation, VecDeque<Fault>>,
    calls: HashMap<Operation, u32>,
    retry_tokens: HashMap<String, MutationResponse>,
    write_only: HashMap<String, HashSet<String>>,
    page_size: usize,
    sequence: u64,
}

impl Platform {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}.{}", prefix, self.sequence)
    }

    /// Count the call and pop its next fault. Faults injected before commit
    /// are returned immediately.
    fn enter(&mut self, operation: Operation) -> ApiResult<Option<ApiError>> {
        *self.calls.entry(operation).or_default() += 1;
        let fault = self
            .faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(fault) if fault.after_commit => Ok(Some(fault.error)),
            Some(fault) => Err(fault.error),
            None => Ok(None),
        }
    }

    fn resource(&self, kind: &str, id: &str) -> ApiResult<&Attributes> {
        self.resources.get(&key(kind, id)).ok_or_else(|| {
            PlatformError::ResourceNotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            }
            .into()
        })
    }

    fn ensure_idle(&self, kind: &str, id: &str) -> ApiResult<()> {
        let busy = self.work_requests.values().any(|tracked| {
            tracked
                .effect
                .as_ref()
                .is_some_and(|effect| effect.targets(kind, id))
        });
        if busy {
            return Err(PlatformError::Conflict {
                kind: kind.to_string(),
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn set_state(&mut self, kind: &str, id: &str, state: &str) {
        if let Some(resource) = self.resources.get_mut(&key(kind, id)) {
            resource.insert("lifecycle_state".to_string(), AttrValue::from(state));
        }
    }

    /// Track a mutation under the next script, applying it right away if
    /// the script starts terminal
    fn start(
        &mut self,
        operation_type: String,
        kind: &str,
        id: &str,
        effect: Effect,
    ) -> MutationResponse {
        let script = self
            .scripts
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone());

        if script.synchronous {
            self.apply(effect, WorkRequestStatus::Succeeded, None);
            return MutationResponse {
                resource_id: Some(id.to_string()),
                work_request: None,
            };
        }

        let wr_id = self.next_id("ocid1.workrequest");
        let status = script.initial.unwrap_or_else(|| script.status_at(0));
        let work_request = WorkRequest::new(&wr_id, operation_type, status).with_resource(
            kind,
            id,
            "IN_PROGRESS",
        );
        let mut tracked = TrackedWorkRequest {
            work_request,
            script,
            reads: 0,
            effect: Some(effect),
        };
        if status.is_terminal() {
            self.finish(&mut tracked);
        }

        let response = MutationResponse {
            resource_id: None,
            work_request: Some(tracked.work_request.clone()),
        };
        tracing::debug!(work_request_id = %wr_id, status = %status, "Accepted mutation");
        self.work_requests.insert(wr_id, tracked);
        response
    }

    fn finish(&mut self, tracked: &mut TrackedWorkRequest) {
        let status = tracked.work_request.status;
        let wr = &mut tracked.work_request;
        wr.time_finished = Some(Utc::now());

        let action_type = match (&tracked.effect, status) {
            (_, WorkRequestStatus::Failed) => "FAILED",
            (_, WorkRequestStatus::Canceled) => "CANCELED",
            (Some(Effect::Create { .. }), _) => "CREATED",
            (Some(Effect::Delete { .. }), _) => "DELETED",
            _ => "UPDATED",
        };
        for resource in &mut wr.resources {
            resource.action_type = action_type.to_string();
        }

        let reason = tracked.script.reason.clone();
        if status == WorkRequestStatus::Succeeded {
            wr.percent_complete = 100.0;
        } else {
            wr.errors.push(WorkRequestError {
                code: if status == WorkRequestStatus::Canceled {
                    "Canceled".to_string()
                } else {
                    "InternalError".to_string()
                },
                message: reason
                    .clone()
                    .unwrap_or_else(|| "work request did not succeed".to_string()),
            });
        }

        if let Some(effect) = tracked.effect.take() {
            self.apply(effect, status, reason);
        }
    }

    fn apply(&mut self, effect: Effect, status: WorkRequestStatus, reason: Option<String>) {
        let succeeded = status == WorkRequestStatus::Succeeded;
        match effect {
            Effect::Create { kind, id } => {
                let state = if succeeded { "AVAILABLE" } else { "FAILED" };
                self.set_state(&kind, &id, state);
            }
            Effect::Delete { kind, id } => {
                if succeeded {
                    self.resources.remove(&key(&kind, &id));
                    self.history.remove(&key(&kind, &id));
                } else {
                    self.set_state(&kind, &id, "AVAILABLE");
                }
            }
            Effect::Action {
                kind,
                id,
                action,
                parameters,
                started,
            } => {
                if succeeded {
                    if let Some(resource) = self.resources.get_mut(&key(&kind, &id)) {
                        if action == LifecycleAction::Update {
                            resource.extend(parameters.clone());
                        } else if action == LifecycleAction::Upgrade {
                            if let Some(version) = parameters.get("db_version") {
                                resource.insert("db_version".to_string(), version.clone());
                            }
                        }
                    }
                }
                self.set_state(&kind, &id, "AVAILABLE");

                if action == LifecycleAction::Update {
                    return;
                }
                let entry = HistoryEntry {
                    id: self.next_id("ocid1.historyentry"),
                    action,
                    state: if succeeded {
                        HistoryState::Succeeded
                    } else {
                        HistoryState::Failed
                    },
                    source: parameters
                        .get("source")
                        .and_then(AttrValue::as_str)
                        .map(str::to_string),
                    target_version: parameters
                        .get("db_version")
                        .and_then(AttrValue::as_str)
                        .map(str::to_string),
                    options: parameters
                        .get("options")
                        .and_then(AttrValue::as_str)
                        .map(str::to_string),
                    lifecycle_details: if succeeded { None } else { reason },
                    time_started: started,
                    time_ended: Some(Utc::now()),
                };
                self.history.entry(key(&kind, &id)).or_default().push(entry);
            }
        }
    }
}

/// In-memory implementation of [`CloudApiClient`]
#[derive(Debug)]
pub struct InMemoryCloud {
    platform: Mutex<Platform>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self {
            platform: Mutex::new(Platform {
                page_size: DEFAULT_PAGE_SIZE,
                ..Platform::default()
            }),
        }
    }

    /// History entries per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.platform.get_mut().page_size = page_size.max(1);
        self
    }

    /// Script used when no queued script is left
    pub fn with_default_script(mut self, script: WorkRequestScript) -> Self {
        self.platform.get_mut().default_script = script;
        self
    }

    /// Attributes of `kind` that are accepted but never returned by reads
    pub fn with_write_only(mut self, kind: &str, attributes: &[&str]) -> Self {
        self.platform
            .get_mut()
            .write_only
            .entry(kind.to_string())
            .or_default()
            .extend(attributes.iter().map(|a| a.to_string()));
        self
    }

    /// Script for the next mutation
    pub async fn push_script(&self, script: WorkRequestScript) {
        self.platform.lock().await.scripts.push_back(script);
    }

    /// Make an existing resource available without going through create
    pub async fn seed_resource(&self, kind: &str, id: &str, attributes: Attributes) {
        let mut platform = self.platform.lock().await;
        let mut attributes = attributes;
        attributes
            .entry("lifecycle_state".to_string())
            .or_insert_with(|| AttrValue::from("AVAILABLE"));
        platform.resources.insert(key(kind, id), attributes);
    }

    /// Fail the next call of `operation` before it has any effect
    pub async fn inject_fault(&self, operation: Operation, error: ApiError) {
        self.inject(operation, error, false).await;
    }

    /// Fail the next `count` calls of `operation`
    pub async fn inject_faults(&self, operation: Operation, count: usize, error: ApiError) {
        for _ in 0..count {
            self.inject(operation, error.clone(), false).await;
        }
    }

    /// Let the next call of `operation` take effect, then lose its response
    pub async fn inject_fault_after_commit(&self, operation: Operation, error: ApiError) {
        self.inject(operation, error, true).await;
    }

    async fn inject(&self, operation: Operation, error: ApiError, after_commit: bool) {
        self.platform
            .lock()
            .await
            .faults
            .entry(operation)
            .or_default()
            .push_back(Fault {
                error,
                after_commit,
            });
    }

    /// Number of calls made to `operation`
    pub async fn calls(&self, operation: Operation) -> u32 {
        self.platform
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    pub async fn reset_calls(&self) {
        self.platform.lock().await.calls.clear();
    }

    /// Stored attributes of a resource, write-only ones included
    pub async fn resource(&self, kind: &str, id: &str) -> Option<Attributes> {
        self.platform
            .lock()
            .await
            .resources
            .get(&key(kind, id))
            .cloned()
    }

    pub async fn resource_count(&self) -> usize {
        self.platform.lock().await.resources.len()
    }

    /// Recorded history of a resource, oldest first
    pub async fn history(&self, kind: &str, id: &str) -> Vec<HistoryEntry> {
        self.platform
            .lock()
            .await
            .history
            .get(&key(kind, id))
            .cloned()
            .unwrap_or_default()
    }

    /// Current view of a work request, without advancing its script
    pub async fn work_request(&self, id: &str) -> Option<WorkRequest> {
        self.platform
            .lock()
            .await
            .work_requests
            .get(id)
            .map(|tracked| tracked.work_request.clone())
    }
}

fn operation_name(verb: &str, kind: &str) -> String {
    format!("{}_{}", verb, kind.to_ascii_uppercase())
}

fn commit<T>(result: T, fault: Option<ApiError>) -> ApiResult<T> {
    match fault {
        Some(error) => Err(error),
        None => Ok(result),
    }
}

#[async_trait]
impl CloudApiClient for InMemoryCloud {
    async fn create(&self, request: &CreateRequest) -> ApiResult<MutationResponse> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::Create)?;

        if let Some(previous) = platform.retry_tokens.get(&request.retry_token) {
            tracing::debug!(retry_token = %request.retry_token, "Replaying create");
            return commit(previous.clone(), fault);
        }

        let id = platform.next_id(&format!("ocid1.{}", request.kind));
        let mut attributes = request.attributes.clone();
        attributes.insert("id".to_string(), AttrValue::from(id.as_str()));
        attributes.insert("lifecycle_state".to_string(), AttrValue::from("PROVISIONING"));
        attributes.insert(
            "time_created".to_string(),
            AttrValue::from(Utc::now().to_rfc3339()),
        );
        platform
            .resources
            .insert(key(&request.kind, &id), attributes);

        let response = platform.start(
            operation_name("CREATE", &request.kind),
            &request.kind,
            &id,
            Effect::Create {
                kind: request.kind.clone(),
                id: id.clone(),
            },
        );
        platform
            .retry_tokens
            .insert(request.retry_token.clone(), response.clone());
        commit(response, fault)
    }

    async fn read(&self, kind: &str, resource_id: &str) -> ApiResult<Attributes> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::Read)?;

        let mut attributes = platform.resource(kind, resource_id)?.clone();
        if let Some(hidden) = platform.write_only.get(kind) {
            attributes.retain(|name, _| !hidden.contains(name));
        }
        commit(attributes, fault)
    }

    async fn apply_action(&self, request: &ActionRequest) -> ApiResult<MutationResponse> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::ApplyAction)?;

        if let Some(previous) = platform.retry_tokens.get(&request.retry_token) {
            tracing::debug!(retry_token = %request.retry_token, "Replaying action");
            return commit(previous.clone(), fault);
        }

        platform.resource(&request.kind, &request.resource_id)?;
        platform.ensure_idle(&request.kind, &request.resource_id)?;

        let state = match request.action {
            LifecycleAction::Update => "UPDATING",
            _ => "UPGRADING",
        };
        platform.set_state(&request.kind, &request.resource_id, state);

        let response = platform.start(
            operation_name(request.action.as_str(), &request.kind),
            &request.kind,
            &request.resource_id,
            Effect::Action {
                kind: request.kind.clone(),
                id: request.resource_id.clone(),
                action: request.action,
                parameters: request.parameters.clone(),
                started: Utc::now(),
            },
        );
        platform
            .retry_tokens
            .insert(request.retry_token.clone(), response.clone());
        commit(response, fault)
    }

    async fn delete(&self, request: &DeleteRequest) -> ApiResult<Option<WorkRequest>> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::Delete)?;

        if let Some(previous) = platform.retry_tokens.get(&request.retry_token) {
            tracing::debug!(retry_token = %request.retry_token, "Replaying delete");
            return commit(previous.work_request.clone(), fault);
        }

        let (kind, resource_id) = (request.kind.as_str(), request.resource_id.as_str());
        platform.resource(kind, resource_id)?;
        platform.ensure_idle(kind, resource_id)?;
        platform.set_state(kind, resource_id, "TERMINATING");

        let response = platform.start(
            operation_name("DELETE", kind),
            kind,
            resource_id,
            Effect::Delete {
                kind: kind.to_string(),
                id: resource_id.to_string(),
            },
        );
        platform
            .retry_tokens
            .insert(request.retry_token.clone(), response.clone());
        commit(response.work_request, fault)
    }

    async fn get_work_request(&self, work_request_id: &str) -> ApiResult<WorkRequest> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::GetWorkRequest)?;

        let mut tracked = platform
            .work_requests
            .remove(work_request_id)
            .ok_or_else(|| PlatformError::WorkRequestNotFound(work_request_id.to_string()))?;

        if !tracked.work_request.is_terminal() {
            let step = tracked.reads;
            tracked.work_request.status = tracked.script.status_at(step);
            tracked.work_request.percent_complete = tracked.script.percent_at(step);
            if tracked.work_request.is_terminal() {
                platform.finish(&mut tracked);
            }
        }
        tracked.reads += 1;

        let work_request = tracked.work_request.clone();
        platform
            .work_requests
            .insert(work_request_id.to_string(), tracked);
        commit(work_request, fault)
    }

    async fn list_history(
        &self,
        kind: &str,
        resource_id: &str,
        page: Option<&str>,
    ) -> ApiResult<HistoryPage> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::ListHistory)?;

        platform.resource(kind, resource_id)?;
        let start = match page {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| PlatformError::InvalidPageToken(token.to_string()))?,
        };

        let entries = platform
            .history
            .get(&key(kind, resource_id))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let end = start.saturating_add(platform.page_size).min(entries.len());
        let items = entries.get(start..end).unwrap_or_default().to_vec();
        let next_page = (end < entries.len()).then(|| end.to_string());

        commit(HistoryPage { items, next_page }, fault)
    }

    async fn get_history_entry(
        &self,
        kind: &str,
        resource_id: &str,
        entry_id: &str,
    ) -> ApiResult<HistoryEntry> {
        let mut platform = self.platform.lock().await;
        let fault = platform.enter(Operation::GetHistoryEntry)?;

        let entry = platform
            .history
            .get(&key(kind, resource_id))
            .and_then(|entries| entries.iter().find(|e| e.id == entry_id))
            .cloned()
            .ok_or_else(|| PlatformError::HistoryEntryNotFound {
                resource_id: resource_id.to_string(),
                entry_id: entry_id.to_string(),
            })?;
        commit(entry, fault)
    }
}
