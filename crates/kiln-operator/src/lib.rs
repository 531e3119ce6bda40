//! Kiln operator: runs the repository sync engines and the job status
//! controllers against one namespace

#![deny(missing_docs)]

/// Operator configuration
pub mod config;
/// Controller runner - builds the controller and sync futures per kind
pub mod controller_runner;
/// CRD installation and printing
pub mod crds;

pub use config::{OperatorConfig, RepositoryBackend};
