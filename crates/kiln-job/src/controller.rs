//! Status controller for run-backed entities
//!
//! One reconcile pass, in order:
//! 1. terminal guard: a Succeeded/Failed entity is never touched again
//! 2. ensure the result store exists
//! 3. dispatch the Run (state empty) or fetch it (state set)
//! 4. derive the new state, capturing results on success
//! 5. persist the status in a single write guarded by `resourceVersion`
//!
//! A Run found while the state is still empty is residue of an interrupted
//! dispatch; Run specs are immutable, so it is deleted and recreated. A Run
//! missing once the state is set is an error, never a silent re-dispatch.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource};
use serde_json::json;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use kiln_common::crd::{DomainResource, EntityState, EntityStatus, JobResource};
use kiln_common::events::{actions, reasons, EntityEvent, EventPublisher};
use kiln_common::{Error, Result, FIELD_MANAGER};

use crate::backend::ExecutionBackend;
use crate::run::{result_store_name, RunRequest};
use crate::state::{apply_derivation, derive_state, POD_EVICTED_REASON};

/// Writes an entity's status subresource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusPatcher: Send + Sync {
    /// Replace the status, failing with `Error::Conflict` when the object
    /// changed since `resource_version` was read
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &EntityStatus,
    ) -> Result<()>;
}

/// [`StatusPatcher`] for one custom resource kind
pub struct KubeStatusPatcher<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStatusPatcher<K> {
    /// Create a patcher using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: DomainResource> StatusPatcher for KubeStatusPatcher<K> {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &EntityStatus,
    ) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let mut patch = json!({ "status": status });
        if let Some(rv) = resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(K::KIND.as_str(), name, e))?;
        Ok(())
    }
}

/// Requeue intervals of the status controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Re-check interval while a job is not terminal
    pub poll_interval: Duration,
    /// Requeue after a retryable error
    pub retry_interval: Duration,
    /// Requeue after an error that needs outside intervention
    pub backoff_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            retry_interval: Duration::from_secs(5),
            backoff_interval: Duration::from_secs(300),
        }
    }
}

/// Shared context for one kind's status controller
pub struct JobContext {
    /// Where Runs execute
    pub backend: Arc<dyn ExecutionBackend>,
    /// Status writer for the controlled kind
    pub status: Arc<dyn StatusPatcher>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Requeue intervals
    pub config: ControllerConfig,
}

impl JobContext {
    /// Create a context with default intervals
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        status: Arc<dyn StatusPatcher>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            backend,
            status,
            events,
            config: ControllerConfig::default(),
        }
    }

    /// Override the requeue intervals
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Compute the next status of a job entity
///
/// Returns `None` when nothing observable changed.
pub async fn reconcile_status<K: JobResource>(
    obj: &K,
    backend: &dyn ExecutionBackend,
    events: &dyn EventPublisher,
) -> Result<Option<EntityStatus>> {
    let id = obj.entity_id();
    let kind = K::KIND.as_str();
    let state = obj.current_state();

    if state.is_terminal() || obj.is_deleting() {
        return Ok(None);
    }

    let request = RunRequest::for_resource(obj)?;
    let namespace = request.namespace.as_str();
    let store = result_store_name(&id);

    backend
        .ensure_result_store(namespace, &store, &request.owner)
        .await?;

    let run = if state.is_set() {
        let run = backend
            .get_run(namespace, &id)
            .await?
            .ok_or_else(|| Error::run_missing(kind, id.as_str()))?;
        Some(run)
    } else {
        if backend.get_run(namespace, &id).await?.is_some() {
            warn!(kind, %id, "Found run from an interrupted dispatch, recreating it");
            backend.delete_run(namespace, &id).await?;
            let event = EntityEvent::warning(reasons::RUN_RECREATED, actions::DISPATCH)
                .note(Some(format!("Deleted stale run {id} before dispatch")));
            events.publish(&obj.object_ref(&()), event).await;
        }
        match backend.create_run(&request).await {
            Ok(()) => {}
            // The stale run is still terminating.
            Err(Error::AlreadyExists { .. }) => return Err(Error::conflict(kind, id.as_str())),
            Err(e) => return Err(e),
        }
        None
    };

    let pod = match run.as_ref().and_then(|r| r.pod_name.as_deref()) {
        Some(pod_name) => backend.get_pod(namespace, pod_name).await?,
        None => None,
    };

    let Some(derivation) = derive_state(run.as_ref(), pod.as_ref()) else {
        debug!(kind, %id, "Pod finished before the run condition, waiting");
        return Ok(None);
    };

    let current = obj.entity_status();
    let mut next = apply_derivation(current, &derivation, Utc::now());
    if derivation.capture_results {
        next.results = backend.read_results(namespace, &store).await?;
    }

    let unchanged = current.is_some_and(|c| c.same_observation(&next));
    Ok((!unchanged).then_some(next))
}

/// Reconcile one job entity
pub async fn reconcile<K: JobResource>(obj: Arc<K>, ctx: Arc<JobContext>) -> Result<Action> {
    let id = obj.entity_id();
    let kind = K::KIND.as_str();
    let previous = obj.current_state();

    let Some(status) =
        reconcile_status(obj.as_ref(), ctx.backend.as_ref(), ctx.events.as_ref()).await?
    else {
        return Ok(next_action(previous, &ctx.config));
    };

    let namespace = obj.meta().namespace.clone().unwrap_or_default();
    ctx.status
        .patch_status(
            &namespace,
            &id,
            obj.meta().resource_version.clone(),
            &status,
        )
        .await?;

    if status.state != previous {
        info!(kind, %id, from = %previous, to = %status.state, "Job state changed");
        publish_transition(obj.as_ref(), &status, ctx.events.as_ref()).await;
    }
    Ok(next_action(status.state, &ctx.config))
}

fn next_action(state: EntityState, config: &ControllerConfig) -> Action {
    if state.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(config.poll_interval)
    }
}

async fn publish_transition<K: JobResource>(
    obj: &K,
    status: &EntityStatus,
    events: &dyn EventPublisher,
) {
    let event = match status.state {
        EntityState::Unset => return,
        EntityState::Scheduling => EntityEvent::normal(reasons::JOB_SCHEDULING, actions::DISPATCH),
        EntityState::Running => EntityEvent::normal(reasons::JOB_RUNNING, actions::RECONCILE),
        EntityState::Succeeded => EntityEvent::normal(reasons::JOB_SUCCEEDED, actions::RECONCILE),
        EntityState::Failed if status.reason.as_deref() == Some(POD_EVICTED_REASON) => {
            EntityEvent::warning(reasons::POD_EVICTED, actions::RECONCILE)
        }
        EntityState::Failed => EntityEvent::warning(reasons::JOB_FAILED, actions::RECONCILE),
    };
    events
        .publish(&obj.object_ref(&()), event.note(status.message.clone()))
        .await;
}

/// Error policy for the status controller
pub fn error_policy<K: JobResource>(obj: Arc<K>, error: &Error, ctx: Arc<JobContext>) -> Action {
    let id = obj.entity_id();
    let kind = K::KIND.as_str();
    if error.is_retryable() {
        warn!(kind, %id, error = %error, "Reconcile failed, will retry");
        Action::requeue(ctx.config.retry_interval)
    } else {
        warn!(kind, %id, error = %error, "Reconcile failed, backing off");
        Action::requeue(ctx.config.backoff_interval)
    }
}
