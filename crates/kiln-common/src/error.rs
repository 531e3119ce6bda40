//! Error types for the Kiln control plane
//!
//! Errors carry the entity kind and ID where one is known so that log lines
//! from the sync engine and the status controllers can be correlated.
//! Classification helpers (`is_retryable`, `is_not_found`, `is_conflict`)
//! drive requeue decisions; terminal job failures are never errors, they are
//! reported through `EntityStatus`.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Kiln operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not a not-found or conflict response
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The entity vanished between listing and fetching
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Entity kind (e.g. "ModelTraining")
        kind: String,
        /// Entity ID
        id: String,
    },

    /// An entity with the same ID already exists
    #[error("{kind} '{id}' already exists")]
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity ID
        id: String,
    },

    /// Optimistic-concurrency check failed; the caller must re-read and retry
    #[error("conflicting write to {kind} '{id}'")]
    Conflict {
        /// Entity kind
        kind: String,
        /// Entity ID
        id: String,
    },

    /// Serialization or hashing failed on a malformed spec
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The entity kind being serialized (if known)
        kind: Option<String>,
    },

    /// The Run of a job that already left the initial state is gone
    #[error("run for {kind} '{id}' is missing although the job was already dispatched")]
    RunMissing {
        /// Entity kind
        kind: String,
        /// Entity ID
        id: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "sync", "controller")
        context: String,
    },
}

impl Error {
    /// Map a kube error for a specific entity, turning 404 and 409 responses
    /// into `NotFound` and `Conflict`.
    pub fn from_kube(kind: impl Into<String>, id: impl Into<String>, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind: kind.into(),
                id: id.into(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.into(),
                    id: id.into(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind: kind.into(),
                id: id.into(),
            },
            other => Self::Kube { source: other },
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with entity kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a run-missing error
    pub fn run_missing(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RunMissing {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Serialization errors need a spec fix and are not retryable.
    /// Everything else is either transient or resolves itself on re-read.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 429
            ),
            Error::Serialization { .. } => false,
            Error::AlreadyExists { .. } => false,
            Error::NotFound { .. }
            | Error::Conflict { .. }
            | Error::RunMissing { .. }
            | Error::Internal { .. } => true,
        }
    }

    /// Whether this is a not-found race (benign for most callers)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}
