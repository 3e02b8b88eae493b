//! Reconciliation engine
//!
//! [`Engine`] drives one resource at a time through
//! `create → poll → (action/update → poll) → delete`, validating every
//! request against its [`ResourceDescriptor`] first. Operations on distinct
//! resources may run concurrently on the same engine.

use crate::action::{ChangeKind, LifecycleAction, Plan};
use crate::client::{ActionRequest, CloudApiClient, CreateRequest, DeleteRequest};
use crate::config::EngineConfig;
use crate::descriptor::ResourceDescriptor;
use crate::desired::DesiredState;
use crate::error::{ReconcileError, Result};
use crate::history::{HistoryEntry, history_stream};
use crate::poll::{PollOptions, poll_work_request};
use crate::retry::retry_transient;
use crate::state::{ObservedState, StateStore};
use crate::value::Attributes;
use crate::work_request::{WorkRequest, WorkRequestStatus};
use futures_util::{Stream, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one [`Engine::reconcile`] pass
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// The plan that was executed
    pub plan: Plan,
    /// State saved as the new baseline
    pub state: ObservedState,
}

/// Reconciliation engine bound to one Cloud API client
pub struct Engine<C: ?Sized> {
    client: Arc<C>,
    config: EngineConfig,
}

impl<C: ?Sized> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
        }
    }
}

impl<C> Engine<C>
where
    C: CloudApiClient + ?Sized,
{
    pub fn new(client: Arc<C>, config: EngineConfig) -> Self {
        Self { client, config }
    }

    pub fn with_default_config(client: Arc<C>) -> Self {
        Self::new(client, EngineConfig::default())
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a resource and wait until the platform reports it ready
    pub async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        desired: &DesiredState,
    ) -> Result<ObservedState> {
        let attributes = descriptor.validate_create(desired)?;
        let kind = descriptor.kind();
        let request = CreateRequest::new(kind, attributes.clone());

        info!(
            kind = %kind,
            attributes = ?descriptor.redact(&attributes),
            "Creating resource"
        );

        let response = retry_transient(&self.config.retry, "create", || {
            self.client.create(&request)
        })
        .await?;

        let work_request = self
            .await_terminal(response.work_request, LifecycleAction::Create)
            .await?;
        ensure_succeeded(work_request.as_ref())?;

        let resource_id = response
            .resource_id
            .or_else(|| {
                work_request
                    .as_ref()
                    .and_then(|wr| wr.resource_identifier(kind))
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                ReconcileError::State(format!("create of {} returned no resource identifier", kind))
            })?;

        let server = self.read_back(descriptor, &resource_id).await?;
        let state = ObservedState::merged(descriptor, &resource_id, &attributes, &server)
            .with_work_request(work_request.map(|wr| wr.id));

        info!(kind = %kind, resource_id = %resource_id, "Resource created");
        Ok(state)
    }

    /// Refresh a resource; `None` when it no longer exists
    pub async fn read(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
    ) -> Result<Option<ObservedState>> {
        Ok(self
            .read_attributes(descriptor, resource_id)
            .await?
            .map(|server| {
                ObservedState::merged(descriptor, resource_id, &Attributes::new(), &server)
            }))
    }

    /// Run a lifecycle action (UPDATE, PRECHECK, UPGRADE, ...) and wait for it.
    ///
    /// Identical repeated invocations are passed through to the platform.
    pub async fn apply_action(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
        action: LifecycleAction,
        params: &DesiredState,
    ) -> Result<ObservedState> {
        if matches!(action, LifecycleAction::Create | LifecycleAction::Delete) {
            return Err(ReconcileError::validation(
                descriptor.kind(),
                "action",
                format!("{} is not a resource action", action),
            ));
        }
        let params = descriptor.validate_action(action, params)?;
        let (work_request, server) = self
            .run_action(descriptor, resource_id, action, &params)
            .await?;

        Ok(
            ObservedState::merged(descriptor, resource_id, &params, &server)
                .with_work_request(work_request.map(|wr| wr.id)),
        )
    }

    /// Bring a resource in line with `desired` by updating its mutable
    /// attributes. Returns `prior` untouched when nothing changed.
    pub async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        prior: &ObservedState,
        desired: &DesiredState,
    ) -> Result<ObservedState> {
        let plan = Plan::compute(descriptor, desired, Some(prior))?;
        match plan.change {
            ChangeKind::NoOp => {
                debug!(kind = %descriptor.kind(), resource_id = %prior.id, "No changes");
                Ok(prior.clone())
            }
            ChangeKind::Replace => {
                let attribute = plan.replacement_reasons().join(",");
                Err(ReconcileError::validation(
                    descriptor.kind(),
                    attribute,
                    "changing this attribute requires replacing the resource",
                ))
            }
            ChangeKind::Update | ChangeKind::Create => {
                self.apply_update(descriptor, prior, &plan).await
            }
        }
    }

    /// Delete a resource. A resource that is already gone counts as deleted.
    pub async fn delete(&self, descriptor: &ResourceDescriptor, resource_id: &str) -> Result<()> {
        descriptor.require_action(LifecycleAction::Delete)?;
        let kind = descriptor.kind();

        info!(kind = %kind, resource_id = %resource_id, "Deleting resource");

        let request = DeleteRequest::new(kind, resource_id);
        let work_request = match retry_transient(&self.config.retry, "delete", || {
            self.client.delete(&request)
        })
        .await
        {
            Ok(work_request) => work_request,
            Err(e) if e.is_not_found() => {
                info!(kind = %kind, resource_id = %resource_id, "Resource already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let work_request = self
            .await_terminal(work_request, LifecycleAction::Delete)
            .await?;
        ensure_succeeded(work_request.as_ref())?;

        info!(kind = %kind, resource_id = %resource_id, "Resource deleted");
        Ok(())
    }

    /// Poll a work request until terminal or `options.timeout` elapses
    pub async fn poll(&self, work_request_id: &str, options: PollOptions) -> Result<WorkRequest> {
        poll_work_request(&*self.client, work_request_id, options, &self.config.retry).await
    }

    /// Full action history of a resource, oldest first, fetched page by page
    /// as the stream is consumed
    pub fn read_history<'a>(
        &'a self,
        descriptor: &'a ResourceDescriptor,
        resource_id: &'a str,
    ) -> impl Stream<Item = Result<HistoryEntry>> + Send + 'a {
        history_stream(&*self.client, self.config.retry, descriptor.kind(), resource_id)
    }

    /// Most recent history entry, if any
    pub async fn latest_history_entry(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
    ) -> Result<Option<HistoryEntry>> {
        self.read_history(descriptor, resource_id)
            .try_fold(None, |_, entry| async move { Ok(Some(entry)) })
            .await
    }

    /// A single history entry by id; `None` when the platform has no such entry
    pub async fn history_entry(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
        entry_id: &str,
    ) -> Result<Option<HistoryEntry>> {
        let result = retry_transient(&self.config.retry, "get_history_entry", || {
            self.client
                .get_history_entry(descriptor.kind(), resource_id, entry_id)
        })
        .await;

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// One full pass for the resource stored at `address`: refresh, plan,
    /// execute and save the new state.
    pub async fn reconcile(
        &self,
        descriptor: &ResourceDescriptor,
        address: &str,
        desired: &DesiredState,
        store: &dyn StateStore,
    ) -> Result<ReconcileOutcome> {
        let prior = match store.load(address).await? {
            Some(saved) => self.refresh(descriptor, address, saved).await?,
            None => None,
        };

        let plan = Plan::compute(descriptor, desired, prior.as_ref())?;
        info!(address = %address, plan = %plan, "Planned change");

        let state = match (plan.change, prior) {
            (ChangeKind::NoOp, Some(prior)) => prior,
            (ChangeKind::Update, Some(prior)) => {
                self.apply_update(descriptor, &prior, &plan).await?
            }
            (ChangeKind::Replace, Some(prior)) => {
                info!(
                    address = %address,
                    attributes = ?plan.replacement_reasons(),
                    "Replacing resource"
                );
                self.delete(descriptor, &prior.id).await?;
                self.create(descriptor, desired).await?
            }
            _ => self.create(descriptor, desired).await?,
        };

        store.save(address, &state).await?;
        Ok(ReconcileOutcome { plan, state })
    }

    /// Delete the resource stored at `address` and forget it
    pub async fn destroy(
        &self,
        descriptor: &ResourceDescriptor,
        address: &str,
        store: &dyn StateStore,
    ) -> Result<Option<ObservedState>> {
        let Some(saved) = store.load(address).await? else {
            debug!(address = %address, "Nothing to destroy");
            return Ok(None);
        };
        self.delete(descriptor, &saved.id).await?;
        store.remove(address).await
    }

    async fn refresh(
        &self,
        descriptor: &ResourceDescriptor,
        address: &str,
        saved: ObservedState,
    ) -> Result<Option<ObservedState>> {
        let Some(server) = self.read_attributes(descriptor, &saved.id).await? else {
            info!(
                address = %address,
                resource_id = %saved.id,
                "Resource disappeared outside of the engine"
            );
            return Ok(None);
        };
        let mut refreshed = ObservedState::merged(descriptor, &saved.id, &saved.attributes, &server)
            .with_work_request(saved.last_work_request_id);
        refreshed.created_at = saved.created_at;
        Ok(Some(refreshed))
    }

    async fn apply_update(
        &self,
        descriptor: &ResourceDescriptor,
        prior: &ObservedState,
        plan: &Plan,
    ) -> Result<ObservedState> {
        let params = descriptor
            .validate_action(LifecycleAction::Update, &DesiredState::from(plan.updates()))?;
        let (work_request, server) = self
            .run_action(descriptor, &prior.id, LifecycleAction::Update, &params)
            .await?;

        let mut base = prior.attributes.clone();
        base.extend(plan.desired.clone());
        let mut state = ObservedState::merged(descriptor, &prior.id, &base, &server)
            .with_work_request(work_request.map(|wr| wr.id));
        state.created_at = prior.created_at;
        Ok(state)
    }

    async fn run_action(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
        action: LifecycleAction,
        params: &Attributes,
    ) -> Result<(Option<WorkRequest>, Attributes)> {
        let request = ActionRequest::new(descriptor.kind(), resource_id, action, params.clone());

        info!(
            kind = %descriptor.kind(),
            resource_id = %resource_id,
            action = %action,
            parameters = ?descriptor.redact(params),
            "Applying action"
        );

        let response = retry_transient(&self.config.retry, "apply_action", || {
            self.client.apply_action(&request)
        })
        .await?;

        let work_request = self.await_terminal(response.work_request, action).await?;
        ensure_succeeded(work_request.as_ref())?;

        let server = self.read_back(descriptor, resource_id).await?;
        Ok((work_request, server))
    }

    /// Wait for `work_request` to finish. A request that is already terminal
    /// is returned without reading its status.
    async fn await_terminal(
        &self,
        work_request: Option<WorkRequest>,
        action: LifecycleAction,
    ) -> Result<Option<WorkRequest>> {
        match work_request {
            Some(wr) if wr.is_terminal() => Ok(Some(wr)),
            Some(wr) => {
                debug!(
                    work_request_id = %wr.id,
                    operation = %wr.operation_type,
                    "Waiting for work request"
                );
                let options = self.config.poll_options(action);
                Ok(Some(self.poll(&wr.id, options).await?))
            }
            None => Ok(None),
        }
    }

    async fn read_attributes(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
    ) -> Result<Option<Attributes>> {
        let result = retry_transient(&self.config.retry, "read", || {
            self.client.read(descriptor.kind(), resource_id)
        })
        .await;

        match result {
            Ok(attributes) => Ok(Some(attributes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read_back(
        &self,
        descriptor: &ResourceDescriptor,
        resource_id: &str,
    ) -> Result<Attributes> {
        self.read_attributes(descriptor, resource_id)
            .await?
            .ok_or_else(|| {
                ReconcileError::State(format!(
                    "{} {} was not found after a successful work request",
                    descriptor.kind(),
                    resource_id
                ))
            })
    }
}

fn ensure_succeeded(work_request: Option<&WorkRequest>) -> Result<()> {
    match work_request {
        Some(wr) if wr.status != WorkRequestStatus::Succeeded => {
            Err(ReconcileError::Reconciliation {
                work_request_id: wr.id.clone(),
                status: wr.status,
                reason: wr.failure_reason(),
            })
        }
        _ => Ok(()),
    }
}
