//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller. This keeps controller construction pure and testable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use kiln_common::crd::{
    BatchInferenceJob, DomainResource, JobResource, ModelDeployment, ModelPackaging, ModelTraining,
};
use kiln_common::events::KubeEventPublisher;
use kiln_job::{error_policy, reconcile, JobContext, KubeExecutionBackend, KubeStatusPatcher};
use kiln_sync::{
    ConfigMapRepository, KindAdapter, KubeWorkloadApi, MemoryRepository, Repository, SyncEngine,
};

use crate::config::{OperatorConfig, RepositoryBackend};

/// A long-running controller or sync loop
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Name reported on Kubernetes Events
pub const CONTROLLER_NAME: &str = "kiln-controller";

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the status controllers for every run-backed kind
///
/// Controllers stop on SIGTERM or Ctrl-C.
pub fn build_job_controllers(client: Client, namespace: &str) -> Vec<ControllerFuture> {
    vec![
        job_controller::<ModelTraining>(client.clone(), namespace),
        job_controller::<ModelPackaging>(client.clone(), namespace),
        job_controller::<BatchInferenceJob>(client, namespace),
    ]
}

fn job_controller<K: JobResource>(client: Client, namespace: &str) -> ControllerFuture {
    let kind = K::KIND.as_str();
    let ctx = Arc::new(JobContext::new(
        Arc::new(KubeExecutionBackend::new(client.clone())),
        Arc::new(KubeStatusPatcher::<K>::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
    ));
    let api: Api<K> = Api::namespaced(client, namespace);

    tracing::info!("- {} controller", kind);

    Box::pin(
        Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(log_reconcile_result(kind)),
    )
}

/// Build one sync engine per domain kind
///
/// Engines stop when `shutdown` is cancelled.
pub fn build_sync_engines(
    client: Client,
    config: &OperatorConfig,
    shutdown: CancellationToken,
) -> Vec<ControllerFuture> {
    vec![
        sync_engine::<ModelTraining>(client.clone(), config, shutdown.clone()),
        sync_engine::<ModelPackaging>(client.clone(), config, shutdown.clone()),
        sync_engine::<ModelDeployment>(client.clone(), config, shutdown.clone()),
        sync_engine::<BatchInferenceJob>(client, config, shutdown),
    ]
}

fn sync_engine<K: DomainResource>(
    client: Client,
    config: &OperatorConfig,
    shutdown: CancellationToken,
) -> ControllerFuture {
    let repository = repository_for::<K>(client.clone(), config);
    let workloads = Arc::new(KubeWorkloadApi::<K>::new(
        client.clone(),
        &config.namespace,
    ));
    let adapter = KindAdapter::<K>::new(config.namespace.clone(), repository, workloads);
    let engine = SyncEngine::new(adapter, config.sync_config());

    let api: Api<K> = Api::namespaced(client, &config.namespace);
    let events = watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff();

    tracing::info!("- {} sync engine", K::KIND);

    Box::pin(engine.run(events, shutdown))
}

fn repository_for<K: DomainResource>(
    client: Client,
    config: &OperatorConfig,
) -> Arc<dyn Repository<K::Spec>> {
    match config.repository {
        RepositoryBackend::Memory => Arc::new(MemoryRepository::<K::Spec>::new(K::KIND.as_str())),
        RepositoryBackend::ConfigMap => Arc::new(ConfigMapRepository::<K::Spec>::new(
            client,
            &config.namespace,
            K::KIND,
        )),
    }
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
