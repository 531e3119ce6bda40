use std::time::Duration;

use clap::ValueEnum;
use kiln_sync::SyncConfig;

/// Default namespace the operator manages
pub const DEFAULT_NAMESPACE: &str = "kiln";

/// Where entity records are stored
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RepositoryBackend {
    /// In-process map; starts empty and is lost on restart
    Memory,
    /// One ConfigMap per record in the managed namespace
    #[default]
    #[value(name = "configmap")]
    ConfigMap,
}

/// Runtime configuration of the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace holding the custom resources, Runs and records
    pub namespace: String,
    /// Period of the full sync pass
    pub sync_period: Duration,
    /// Record storage
    pub repository: RepositoryBackend,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            sync_period: kiln_sync::engine::DEFAULT_SYNC_PERIOD,
            repository: RepositoryBackend::default(),
        }
    }
}

impl OperatorConfig {
    /// Sync engine configuration
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            period: self.sync_period,
        }
    }
}
