//! Kubernetes Events on entity state transitions
//!
//! Events make a job's progress visible through `kubectl describe` without
//! reading the status. Publishing is fire-and-forget: a failed event is
//! logged and never fails the reconcile that produced it.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// One Event about an entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityEvent {
    /// Warning rather than Normal
    pub warning: bool,
    /// PascalCase reason, one of [`reasons`]
    pub reason: &'static str,
    /// What the controller was doing, one of [`actions`]
    pub action: &'static str,
    /// Human-readable detail
    pub note: Option<String>,
}

impl EntityEvent {
    /// A Normal event
    pub fn normal(reason: &'static str, action: &'static str) -> Self {
        Self {
            warning: false,
            reason,
            action,
            note: None,
        }
    }

    /// A Warning event
    pub fn warning(reason: &'static str, action: &'static str) -> Self {
        Self {
            warning: true,
            ..Self::normal(reason, action)
        }
    }

    /// Attach a note (builder style)
    pub fn note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    fn to_kube(&self) -> Event {
        Event {
            type_: if self.warning {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: self.reason.to_string(),
            note: self.note.clone(),
            action: self.action.to_string(),
            secondary: None,
        }
    }
}

/// Sink for entity Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` on the object behind `target`; never fails
    async fn publish(&self, target: &ObjectReference, event: EntityEvent);
}

/// [`EventPublisher`] writing `events.k8s.io` Events through a `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, target: &ObjectReference, event: EntityEvent) {
        if let Err(e) = self.recorder.publish(&event.to_kube(), target).await {
            warn!(
                reason = event.reason,
                object = target.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// [`EventPublisher`] that keeps every event in memory, for tests
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<(String, EntityEvent)>>,
}

impl RecordingEventPublisher {
    /// Reasons published so far, in order
    pub fn reasons(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|events| events.iter().map(|(_, e)| e.reason).collect())
            .unwrap_or_default()
    }

    /// Events published on the object named `name`
    pub fn events_for(&self, name: &str) -> Vec<EntityEvent> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, target: &ObjectReference, event: EntityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((target.name.clone().unwrap_or_default(), event));
        }
    }
}

/// Event reasons
pub mod reasons {
    /// Run dispatched, waiting for the pod to be scheduled
    pub const JOB_SCHEDULING: &str = "JobScheduling";
    /// Pod is running
    pub const JOB_RUNNING: &str = "JobRunning";
    /// Run finished successfully
    pub const JOB_SUCCEEDED: &str = "JobSucceeded";
    /// Run finished unsuccessfully
    pub const JOB_FAILED: &str = "JobFailed";
    /// Pod was evicted by the kubelet
    pub const POD_EVICTED: &str = "PodEvicted";
    /// Residue of a partial dispatch was deleted and the Run recreated
    pub const RUN_RECREATED: &str = "RunRecreated";
}

/// Event actions
pub mod actions {
    /// Deriving state from the Run
    pub const RECONCILE: &str = "Reconcile";
    /// Creating the Run for a job
    pub const DISPATCH: &str = "Dispatch";
}
