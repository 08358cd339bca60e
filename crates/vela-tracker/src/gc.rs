use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use vela_cluster::ClusterContext;
use vela_config::{Application, GcOrder, GcPolicy, GcStrategy};
use vela_store::{ManagedResource, ResourceTracker, Store, StoredApplication, TrackerKey};

use crate::GcError;

/// What a sweep or finalize pass did, by resource identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
  /// Revisions that were protected from collection.
  pub kept_revisions: Vec<u64>,
  /// Deleted from the cluster (or already absent).
  pub deleted: Vec<String>,
  /// Dropped from an old ledger because a kept revision still tracks them.
  pub released: Vec<String>,
  /// Left in place by an `onAppDelete` rule.
  pub retained: Vec<String>,
  /// Dropped from the ledger without deleting, by a `never` rule.
  pub abandoned: Vec<String>,
  /// Deletes that failed; retried on the next pass.
  pub failed: Vec<String>,
  /// Held back by dependency order while a dependent component still has
  /// resources in the same tracker; retried on the next pass.
  pub deferred: Vec<String>,
  pub trackers_removed: usize,
  pub revisions_pruned: Vec<u64>,
}

impl SweepReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty() && self.deferred.is_empty()
  }

  /// Whether the pass changed anything in the ledger.
  fn progressed(&self) -> bool {
    !self.deleted.is_empty() || !self.released.is_empty() || !self.abandoned.is_empty()
  }

  /// Fold in a later pass. Failures and deferrals describe what is still
  /// outstanding, so only the latest pass's count.
  fn absorb(&mut self, pass: SweepReport) {
    self.deleted.extend(pass.deleted);
    self.released.extend(pass.released);
    self.retained.extend(pass.retained);
    self.abandoned.extend(pass.abandoned);
    self.trackers_removed += pass.trackers_removed;
    self.failed = pass.failed;
    self.deferred = pass.deferred;
  }
}

enum EntryAction {
  Delete,
  Release,
  Retain,
  Abandon,
  Defer,
}

/// Reclaims resources of revisions that are no longer reachable.
#[derive(Clone)]
pub struct GarbageCollector {
  store: Arc<dyn Store>,
  clusters: ClusterContext,
  revision_history_limit: usize,
}

impl GarbageCollector {
  pub fn new(store: Arc<dyn Store>, clusters: ClusterContext, revision_history_limit: usize) -> Self {
    Self {
      store,
      clusters,
      revision_history_limit,
    }
  }

  /// Collect resources tracked only by revisions outside the keep set.
  ///
  /// The keep set is the current revision, the revision current before it
  /// (unless the policy sets `keepPreviousRevision: false`), and every
  /// revision whose tracker has `keepLegacyResource`.
  #[instrument(name = "sweep", skip(self), fields(app = %app_name))]
  pub async fn sweep(&self, app_name: &str) -> Result<SweepReport, GcError> {
    let stored = self.store.get_application(app_name).await?;
    let Some(current) = stored.status.latest_revision.as_ref().map(|r| r.revision) else {
      return Ok(SweepReport::default());
    };
    let policy = policy_of(&stored)?;
    let trackers = self.store.list_trackers(app_name).await?;

    let mut keep: BTreeSet<u64> = BTreeSet::new();
    keep.insert(current);
    keep.extend(
      stored
        .status
        .previous_revision
        .as_ref()
        .filter(|_| policy.keep_previous_revision)
        .map(|previous| previous.revision),
    );
    keep.extend(
      trackers
        .iter()
        .filter(|t| t.keep_legacy_resource)
        .map(|t| t.key.revision),
    );

    let referenced: HashSet<String> = trackers
      .iter()
      .filter(|t| keep.contains(&t.key.revision))
      .flat_map(|t| t.resources.iter().map(ManagedResource::identity))
      .collect();

    let mut report = SweepReport {
      kept_revisions: keep.iter().copied().collect(),
      ..SweepReport::default()
    };

    for tracker in trackers.iter().filter(|t| !keep.contains(&t.key.revision)) {
      let blocked = match policy.order {
        GcOrder::Unordered => HashSet::new(),
        GcOrder::Dependency => {
          let application = match self.store.get_revision(app_name, tracker.key.revision).await {
            Ok(revision) => revision.application,
            Err(vela_store::Error::NotFound(_)) => stored.application.clone(),
            Err(err) => return Err(err.into()),
          };
          blocked_components(&application, tracker)
        }
      };
      self
        .collect_tracker(tracker, &mut report, |entry| {
          if referenced.contains(&entry.identity()) {
            return EntryAction::Release;
          }
          if is_blocked(&blocked, entry) {
            return EntryAction::Defer;
          }
          match policy.strategy_for(entry.component.as_deref(), &entry.resource.key.kind) {
            GcStrategy::OnAppUpdate => EntryAction::Delete,
            GcStrategy::OnAppDelete => EntryAction::Retain,
            GcStrategy::Never => EntryAction::Abandon,
          }
        })
        .await?;
    }

    let last_succeeded = stored
      .status
      .last_succeeded_revision
      .as_ref()
      .map(|r| r.revision);
    report.revisions_pruned = self.prune_revisions(app_name, &keep, last_succeeded).await?;

    info!(
      deleted = report.deleted.len(),
      released = report.released.len(),
      retained = report.retained.len(),
      failed = report.failed.len(),
      deferred = report.deferred.len(),
      trackers_removed = report.trackers_removed,
      revisions_pruned = report.revisions_pruned.len(),
      "sweep_completed"
    );
    Ok(report)
  }

  /// Delete every tracked resource of an application being removed, except
  /// those selected by a `never` rule.
  ///
  /// Under dependency order, passes repeat while entries are held back and
  /// the previous pass made progress.
  #[instrument(name = "finalize", skip(self), fields(app = %app_name))]
  pub async fn finalize(&self, app_name: &str) -> Result<SweepReport, GcError> {
    let (policy, application) = match self.store.get_application(app_name).await {
      Ok(stored) => (policy_of(&stored)?, Some(stored.application)),
      Err(vela_store::Error::NotFound(_)) => (GcPolicy::default(), None),
      Err(err) => return Err(err.into()),
    };

    let mut report = SweepReport::default();
    let mut deleted: HashSet<String> = HashSet::new();
    loop {
      let trackers = self.store.list_trackers(app_name).await?;
      let mut pass = SweepReport::default();
      for tracker in &trackers {
        let blocked = match (policy.order, &application) {
          (GcOrder::Dependency, Some(application)) => blocked_components(application, tracker),
          _ => HashSet::new(),
        };
        self
          .collect_tracker(tracker, &mut pass, |entry| {
            let identity = entry.identity();
            if deleted.contains(&identity) {
              return EntryAction::Release;
            }
            match policy.strategy_for(entry.component.as_deref(), &entry.resource.key.kind) {
              GcStrategy::Never => EntryAction::Abandon,
              _ if is_blocked(&blocked, entry) => EntryAction::Defer,
              _ => {
                deleted.insert(identity);
                EntryAction::Delete
              }
            }
          })
          .await?;
      }

      let again = !pass.deferred.is_empty() && pass.progressed();
      report.absorb(pass);
      if !again {
        break;
      }
    }

    info!(
      deleted = report.deleted.len(),
      abandoned = report.abandoned.len(),
      failed = report.failed.len(),
      deferred = report.deferred.len(),
      "finalize_completed"
    );
    Ok(report)
  }

  async fn collect_tracker(
    &self,
    tracker: &ResourceTracker,
    report: &mut SweepReport,
    mut decide: impl FnMut(&ManagedResource) -> EntryAction,
  ) -> Result<(), GcError> {
    let mut remaining = tracker.resources.len();

    for entry in &tracker.resources {
      let identity = entry.identity();
      match decide(entry) {
        EntryAction::Retain => {
          report.retained.push(identity);
          continue;
        }
        EntryAction::Defer => {
          report.deferred.push(identity);
          continue;
        }
        EntryAction::Release => report.released.push(identity.clone()),
        EntryAction::Abandon => report.abandoned.push(identity.clone()),
        EntryAction::Delete => {
          if !self.delete_resource(&tracker.key, entry).await {
            report.failed.push(identity);
            continue;
          }
          report.deleted.push(identity.clone());
        }
      }
      self
        .store
        .remove_tracked_resource(&tracker.key, &identity)
        .await?;
      remaining -= 1;
    }

    if remaining == 0 {
      self.store.delete_tracker(&tracker.key).await?;
      report.trackers_removed += 1;
    }
    Ok(())
  }

  /// Returns true once the object is gone from its cluster.
  async fn delete_resource(&self, tracker: &TrackerKey, entry: &ManagedResource) -> bool {
    let result = match self.clusters.client(&entry.resource.cluster) {
      Ok(client) => client.delete(&entry.resource.key).await,
      Err(err) => Err(err),
    };
    match result {
      Ok(existed) => {
        info!(
          revision = tracker.revision,
          resource = %entry.resource,
          existed = existed,
          "resource_deleted"
        );
        true
      }
      Err(err) => {
        warn!(
          revision = tracker.revision,
          resource = %entry.resource,
          error = %err,
          "resource_delete_failed"
        );
        false
      }
    }
  }

  async fn prune_revisions(
    &self,
    app_name: &str,
    keep: &BTreeSet<u64>,
    last_succeeded: Option<u64>,
  ) -> Result<Vec<u64>, GcError> {
    let tracked: HashSet<u64> = self
      .store
      .list_trackers(app_name)
      .await?
      .iter()
      .map(|t| t.key.revision)
      .collect();

    let candidates: Vec<u64> = self
      .store
      .list_revisions(app_name)
      .await?
      .iter()
      .rev()
      .map(|r| r.revision)
      .filter(|n| !keep.contains(n) && !tracked.contains(n) && Some(*n) != last_succeeded)
      .skip(self.revision_history_limit)
      .collect();

    let mut pruned = Vec::new();
    for revision in candidates {
      if self.store.delete_revision(app_name, revision).await? {
        info!(revision = revision, "revision_pruned");
        pruned.push(revision);
      }
    }
    pruned.sort_unstable();
    Ok(pruned)
  }
}

fn policy_of(stored: &StoredApplication) -> Result<GcPolicy, GcError> {
  stored
    .application
    .gc_policy()
    .map_err(|err| GcError::InvalidPolicy {
      app: stored.application.name.clone(),
      message: err.to_string(),
    })
}

/// Components of a tracker whose dependents still have entries in it.
fn blocked_components(application: &Application, tracker: &ResourceTracker) -> HashSet<String> {
  let present: HashSet<&str> = tracker
    .resources
    .iter()
    .filter_map(|entry| entry.component.as_deref())
    .collect();

  present
    .iter()
    .filter(|component| {
      application
        .dependents_of(component)
        .iter()
        .any(|dependent| present.contains(dependent))
    })
    .map(|component| component.to_string())
    .collect()
}

fn is_blocked(blocked: &HashSet<String>, entry: &ManagedResource) -> bool {
  entry
    .component
    .as_ref()
    .is_some_and(|component| blocked.contains(component))
}
