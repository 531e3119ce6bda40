//! Status model shared by every Kiln entity
//!
//! The same `EntityStatus` is carried by the cluster object (as its status
//! subresource) and by the repository record, so the sync engine can push it
//! from one side to the other unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an entity
///
/// `Unset` serializes as the empty string: the entity was accepted but the
/// controller has not looked at it yet.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Initial state, nothing dispatched yet
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Run dispatched, pod not running yet
    Scheduling,
    /// Pod is running
    Running,
    /// Run completed successfully (terminal)
    Succeeded,
    /// Run failed or pod was evicted (terminal)
    Failed,
}

impl EntityState {
    /// Whether the state can never change again
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the controller has already acted on the entity
    pub const fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, ""),
            Self::Scheduling => write!(f, "Scheduling"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed status of an entity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: EntityState,

    /// Pod executing the Run, once assigned
    #[serde(default)]
    pub pod_name: Option<String>,

    /// Human-readable message about the current state
    #[serde(default)]
    pub message: Option<String>,

    /// Machine-readable reason for the current state
    #[serde(default)]
    pub reason: Option<String>,

    /// Exit code of the job container, when it terminated
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Key/value results captured from the result store on success
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,

    /// When the entity first left the initial state
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// When the status last changed
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityStatus {
    /// Create a status in the given state
    pub fn with_state(state: EntityState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Set the message (builder style)
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the reason (builder style)
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether the entity reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Compare two statuses ignoring the `updated_at` bookkeeping field
    pub fn same_observation(&self, other: &Self) -> bool {
        self.state == other.state
            && self.pod_name == other.pod_name
            && self.message == other.message
            && self.reason == other.reason
            && self.exit_code == other.exit_code
            && self.results == other.results
            && self.created_at == other.created_at
    }
}
