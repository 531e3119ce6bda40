//! Kiln operator - repository sync and job status controllers

use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;

use kiln_common::telemetry::{init_telemetry, TelemetryConfig};
use kiln_operator::config::DEFAULT_NAMESPACE;
use kiln_operator::controller_runner::{build_job_controllers, build_sync_engines};
use kiln_operator::crds::{crd_yaml, ensure_crds_installed};
use kiln_operator::{OperatorConfig, RepositoryBackend};

/// Kiln - Kubernetes-native control plane for ML training, packaging and inference
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Namespace holding entities, Runs and records
    #[arg(long, env = "KILN_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Seconds between full sync passes
    #[arg(
        long,
        env = "KILN_SYNC_PERIOD_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    sync_period_secs: u64,

    /// Record storage backend
    #[arg(long, env = "KILN_REPOSITORY", value_enum, default_value_t = RepositoryBackend::ConfigMap)]
    repository: RepositoryBackend,

    /// Emit human-readable logs instead of JSON
    #[arg(long, env = "KILN_LOG_TEXT")]
    log_text: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync engines and status controllers (default mode)
    Run,
}

impl Cli {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace.clone(),
            sync_period: Duration::from_secs(self.sync_period_secs),
            repository: self.repository,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "kiln-operator".to_string(),
        json: !cli.log_text,
    })?;

    match cli.command {
        Some(Commands::Run) | None => run(cli.operator_config()).await,
    }
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        namespace = %config.namespace,
        repository = ?config.repository,
        sync_period_secs = config.sync_period.as_secs(),
        "Kiln operator starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    if config.repository == RepositoryBackend::Memory {
        tracing::warn!("Memory repository starts empty, existing objects will be treated as zombies");
    }

    tracing::info!("Starting Kiln controllers...");
    let shutdown = CancellationToken::new();
    let engines = tokio::spawn(futures::future::join_all(build_sync_engines(
        client.clone(),
        &config,
        shutdown.clone(),
    )));
    let controllers = build_job_controllers(client, &config.namespace);

    // Controllers return on SIGTERM or Ctrl-C.
    futures::future::join_all(controllers).await;

    tracing::info!("Controllers stopped, stopping sync engines");
    shutdown.cancel();
    engines
        .await
        .map_err(|e| anyhow::anyhow!("Sync engine task failed: {}", e))?;

    tracing::info!("Kiln operator shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_run_mode() {
        let cli = Cli::try_parse_from(["kiln", "--namespace", "ml"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.crd);
        let config = cli.operator_config();
        assert_eq!(config.namespace, "ml");
        assert_eq!(config.sync_period, Duration::from_secs(10));
    }

    #[test]
    fn cli_accepts_repository_and_period() {
        let cli = Cli::try_parse_from([
            "kiln",
            "--namespace",
            "ml",
            "--repository",
            "memory",
            "--sync-period-secs",
            "30",
            "run",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));
        let config = cli.operator_config();
        assert_eq!(config.repository, RepositoryBackend::Memory);
        assert_eq!(config.sync_period, Duration::from_secs(30));
    }

    #[test]
    fn cli_rejects_a_zero_sync_period() {
        assert!(Cli::try_parse_from(["kiln", "--sync-period-secs", "0"]).is_err());
        assert!(Cli::try_parse_from(["kiln", "--sync-period-secs", "1"]).is_ok());
    }

    #[test]
    fn cli_rejects_unknown_repository() {
        assert!(Cli::try_parse_from(["kiln", "--repository", "postgres"]).is_err());
    }
}
