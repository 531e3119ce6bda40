//! Logging initialization
//!
//! JSON structured logs on stdout, filtered by `RUST_LOG` with a sensible
//! default. Kubernetes downward-API variables are attached to the startup
//! line so logs can be correlated with the pod that produced them.

use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,kiln=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name reported on the startup line (e.g. "kiln-operator")
    pub service_name: String,
    /// Emit JSON instead of human-readable lines
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "kiln".to_string(),
            json: true,
        }
    }
}

/// Initialize the global tracing subscriber
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    let attributes = pod_attributes();
    info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        ?attributes,
        "telemetry initialized"
    );
    Ok(())
}

/// Collect K8s attributes from the environment (set via the downward API)
fn pod_attributes() -> Vec<(&'static str, String)> {
    [
        ("k8s.pod.name", "POD_NAME"),
        ("k8s.namespace.name", "POD_NAMESPACE"),
        ("k8s.node.name", "NODE_NAME"),
    ]
    .into_iter()
    .filter_map(|(key, var)| std::env::var(var).ok().map(|v| (key, v)))
    .collect()
}
