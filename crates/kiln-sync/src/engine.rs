//! Generic Sync Engine
//!
//! One engine runs per entity kind. A full pass lists both sides, classifies
//! every entity with [`plan`], then applies the classes in a fixed order:
//! create, update, report status, delete from service, delete from the
//! repository. A failing entity is logged and counted; the rest of the pass
//! carries on and the next periodic pass retries it.
//!
//! Between passes, create/update events on the cluster objects trigger a fast
//! path that pushes the changed object's status into the repository.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::Resource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiln_common::Result;

use crate::entity::{EntitySource, ExternalServiceEntity, StorageEntity};
use crate::repository::Listing;

/// Default period between full passes
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(10);

/// Shortest period the runner accepts; anything below is raised to it
pub const MIN_SYNC_PERIOD: Duration = Duration::from_millis(1);

/// Sync Engine configuration
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Period between full passes
    pub period: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_SYNC_PERIOD,
        }
    }
}

/// A cluster object scheduled for deletion
#[derive(Debug)]
pub enum ServiceDeletion<'a, S, E> {
    /// The record is deletion-marked and the object is not yet deleting
    Requested(&'a S),
    /// The object has no record at all
    Zombie(&'a E),
}

/// Classification of every entity for one pass
#[derive(Debug)]
pub struct SyncPlan<'a, S, E> {
    /// Records without a cluster object
    pub to_create: Vec<&'a S>,
    /// Records whose spec differs from their cluster object
    pub to_update: Vec<&'a S>,
    /// Cluster objects whose status differs from their record
    pub to_report_status: Vec<&'a E>,
    /// Cluster objects to delete
    pub to_delete_from_service: Vec<ServiceDeletion<'a, S, E>>,
    /// Deletion-marked records whose cluster object is gone
    pub to_delete_from_repository: Vec<&'a S>,
    /// Entities skipped because they could not be read or hashed
    pub skipped: usize,
}

impl<S, E> SyncPlan<'_, S, E> {
    /// Whether the pass has nothing to do
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty()
            && self.to_update.is_empty()
            && self.to_report_status.is_empty()
            && self.to_delete_from_service.is_empty()
            && self.to_delete_from_repository.is_empty()
    }
}

/// Compare two hashes, `None` when either side fails to hash
fn hashes_differ(id: &str, what: &str, a: Result<String>, b: Result<String>) -> Option<bool> {
    match (a, b) {
        (Ok(a), Ok(b)) => Some(a != b),
        (Err(e), _) | (_, Err(e)) => {
            warn!(id, what, error = %e, "Failed to hash entity, skipping it this pass");
            None
        }
    }
}

/// Classify every entity of one kind
///
/// Finished records are left alone. A cluster object whose record exists is
/// never a zombie, even when the record is finished, fails to hash or cannot
/// be read at all.
pub fn plan<'a, S, E>(storage: &'a Listing<S>, service: &'a [E]) -> SyncPlan<'a, S, E>
where
    S: StorageEntity,
    E: ExternalServiceEntity,
{
    let by_id: HashMap<&str, &E> = service.iter().map(|e| (e.id(), e)).collect();
    let recorded: HashSet<&str> = storage
        .items
        .iter()
        .map(|s| s.id())
        .chain(storage.unreadable.iter().map(String::as_str))
        .collect();

    let mut plan = SyncPlan {
        to_create: Vec::new(),
        to_update: Vec::new(),
        to_report_status: Vec::new(),
        to_delete_from_service: Vec::new(),
        to_delete_from_repository: Vec::new(),
        skipped: storage.unreadable.len(),
    };

    for s in &storage.items {
        if s.is_finished() {
            continue;
        }
        let Some(e) = by_id.get(s.id()).copied() else {
            if s.has_deletion_mark() {
                plan.to_delete_from_repository.push(s);
            } else {
                plan.to_create.push(s);
            }
            continue;
        };

        if s.has_deletion_mark() {
            if !e.is_deleting() {
                plan.to_delete_from_service
                    .push(ServiceDeletion::Requested(s));
            }
            continue;
        }
        // Someone else is deleting the object; recreate once it is gone.
        if e.is_deleting() {
            continue;
        }

        let spec = hashes_differ(s.id(), "spec", s.spec_hash(), e.spec_hash());
        let status = hashes_differ(s.id(), "status", s.status_hash(), e.status_hash());
        match (spec, status) {
            (Some(spec_differs), Some(status_differs)) => {
                if spec_differs {
                    plan.to_update.push(s);
                }
                if status_differs {
                    plan.to_report_status.push(e);
                }
            }
            _ => plan.skipped += 1,
        }
    }

    for e in service {
        if !recorded.contains(e.id()) {
            plan.to_delete_from_service.push(ServiceDeletion::Zombie(e));
        }
    }

    plan
}

/// Outcome counters of one pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Cluster objects created
    pub created: usize,
    /// Cluster object specs updated
    pub updated: usize,
    /// Statuses pushed into the repository
    pub reported: usize,
    /// Cluster objects deleted
    pub deleted_from_service: usize,
    /// Records purged
    pub deleted_from_repository: usize,
    /// Entities skipped on read or hash failure
    pub skipped: usize,
    /// Actions that failed
    pub failed: usize,
}

impl SyncReport {
    /// Number of successful actions
    pub fn actions(&self) -> usize {
        self.created
            + self.updated
            + self.reported
            + self.deleted_from_service
            + self.deleted_from_repository
    }
}

/// Periodic and event-driven synchronizer for one entity kind
pub struct SyncEngine<Src> {
    source: Src,
    config: SyncConfig,
}

impl<Src: EntitySource> SyncEngine<Src> {
    /// Create an engine over an entity source
    pub fn new(source: Src, config: SyncConfig) -> Self {
        Self { source, config }
    }

    /// The entity source
    pub fn source(&self) -> &Src {
        &self.source
    }

    /// Run one full diff-and-apply pass
    ///
    /// Fails only when either side cannot be listed.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let storage = self.source.list_storage().await?;
        let service = self.source.list_service().await?;
        let plan = plan(&storage, &service);

        let mut report = SyncReport {
            skipped: plan.skipped,
            ..Default::default()
        };
        if plan.is_empty() {
            return Ok(report);
        }
        let kind = self.source.kind();

        for s in plan.to_create {
            let result = s.create_in_service().await;
            tally(kind, "create", s.id(), result, &mut report.created, &mut report.failed);
        }
        for s in plan.to_update {
            let result = s.update_in_service().await;
            tally(kind, "update", s.id(), result, &mut report.updated, &mut report.failed);
        }
        for e in plan.to_report_status {
            let result = e.report_status().await;
            tally(kind, "report status", e.id(), result, &mut report.reported, &mut report.failed);
        }
        for deletion in plan.to_delete_from_service {
            let (id, result) = match deletion {
                ServiceDeletion::Requested(s) => (s.id(), s.delete_in_service().await),
                ServiceDeletion::Zombie(e) => (e.id(), e.delete().await),
            };
            let done = &mut report.deleted_from_service;
            tally(kind, "delete from service", id, result, done, &mut report.failed);
        }
        for s in plan.to_delete_from_repository {
            let result = s.delete_in_db().await;
            let done = &mut report.deleted_from_repository;
            tally(kind, "delete from repository", s.id(), result, done, &mut report.failed);
        }

        info!(
            kind,
            created = report.created,
            updated = report.updated,
            reported = report.reported,
            deleted_from_service = report.deleted_from_service,
            deleted_from_repository = report.deleted_from_repository,
            skipped = report.skipped,
            failed = report.failed,
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Fast path for a created or updated cluster object
    ///
    /// An object or record that has disappeared in the meantime is not an
    /// error.
    pub async fn handle_event(&self, id: &str) -> Result<()> {
        let Some(entity) = self.source.get_service(id).await? else {
            debug!(kind = self.source.kind(), id, "Object gone before status report");
            return Ok(());
        };
        match entity.report_status().await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Run until `shutdown` fires: a full pass every period, plus the fast
    /// path for every create/update event from `watch`
    ///
    /// Delete events are ignored; the record's own deletion workflow owns
    /// them.
    pub async fn run<W, T>(self, watch: W, shutdown: CancellationToken)
    where
        W: Stream<Item = std::result::Result<Event<T>, watcher::Error>>,
        T: Resource,
    {
        let kind = self.source.kind().to_string();
        let mut watch = std::pin::pin!(watch);

        let period = self.config.period.max(MIN_SYNC_PERIOD);
        if period != self.config.period {
            warn!(%kind, ?period, "Sync period too short, raised to the minimum");
        }
        let mut sync_interval = tokio::time::interval(period);
        sync_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(%kind, period_ms = period.as_millis() as u64, "Sync engine started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(%kind, "Sync engine stopping");
                    return;
                }
                Some(event) = watch.next() => match event {
                    Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => {
                        let id = obj.meta().name.clone().unwrap_or_default();
                        if let Err(e) = self.handle_event(&id).await {
                            warn!(%kind, %id, error = %e, "Failed to report status, next pass will retry");
                        }
                    }
                    Ok(Event::Delete(_)) | Ok(Event::Init) | Ok(Event::InitDone) => {}
                    Err(e) => warn!(%kind, error = %e, "Watcher error, will retry"),
                },
                _ = sync_interval.tick() => {
                    debug!(%kind, "Running periodic sync");
                    if let Err(e) = self.sync_once().await {
                        warn!(%kind, error = %e, "Sync pass failed to list entities");
                    }
                }
            }
        }
    }
}

fn tally(
    kind: &str,
    op: &str,
    id: &str,
    result: Result<()>,
    done: &mut usize,
    failed: &mut usize,
) {
    match result {
        Ok(()) => *done += 1,
        Err(e) => {
            warn!(kind, op, id, error = %e, "Sync action failed, continuing with the pass");
            *failed += 1;
        }
    }
}
