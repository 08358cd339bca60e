//! Reconciling controller.
//!
//! One `reconcile` call is one pass over an application: take or reuse a
//! revision, plan its workflow, run the engine once and write the status
//! back with compare-and-swap. A conflicting write discards the pass and
//! starts over from freshly read state.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vela_cluster::{ClusterContext, Renderer, TemplateRenderer};
use vela_config::Application;
use vela_steps::StepContext;
use vela_store::{ApplicationRevision, CasResult, RevisionStore, Store, StoredApplication};
use vela_tracker::{GarbageCollector, ResourceKeeper, SweepReport};
use vela_workflow::{AppPhase, WorkflowStatus};

use crate::engine::WorkflowEngine;
use crate::error::ControllerError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::planner::{DefaultPlanner, PlanContext, WorkflowPlanner};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
  pub app: String,
  pub phase: AppPhase,
  /// Name of the revision the workflow ran for.
  pub revision: String,
  /// The workflow finished; no requeue needed.
  pub done: bool,
  /// Whether the status was written.
  pub written: bool,
}

/// Drives applications toward their declared state.
pub struct Controller<N: ExecutionNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  revisions: RevisionStore,
  engine: Arc<WorkflowEngine<N>>,
  planner: Arc<dyn WorkflowPlanner>,
  clusters: ClusterContext,
  renderer: Arc<dyn Renderer>,
  keeper: ResourceKeeper,
  gc: GarbageCollector,
}

impl<N: ExecutionNotifier> Controller<N> {
  pub fn new(store: Arc<dyn Store>, clusters: ClusterContext, engine: Arc<WorkflowEngine<N>>) -> Self {
    let gc = GarbageCollector::new(
      store.clone(),
      clusters.clone(),
      engine.settings().revision_history_limit,
    );
    Self {
      revisions: RevisionStore::new(store.clone()),
      keeper: ResourceKeeper::new(store.clone()),
      store,
      engine,
      planner: Arc::new(DefaultPlanner),
      clusters,
      renderer: Arc::new(TemplateRenderer::new()),
      gc,
    }
  }

  pub fn with_planner(mut self, planner: Arc<dyn WorkflowPlanner>) -> Self {
    self.planner = planner;
    self
  }

  pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
    self.renderer = renderer;
    self
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub fn engine(&self) -> &Arc<WorkflowEngine<N>> {
    &self.engine
  }

  pub fn planner(&self) -> &Arc<dyn WorkflowPlanner> {
    &self.planner
  }

  pub fn gc(&self) -> &GarbageCollector {
    &self.gc
  }

  /// Create or update an application, then reconcile it once.
  #[instrument(name = "deploy", skip(self, application), fields(app = %application.name))]
  pub async fn deploy(&self, application: Application) -> Result<ReconcileOutcome, ControllerError> {
    match self.store.create_application(&application).await {
      Ok(_) => info!(app = %application.name, "application_created"),
      Err(vela_store::Error::AlreadyExists(_)) => self.update_spec(&application).await?,
      Err(e) => return Err(e.into()),
    }
    self.reconcile(&application.name).await
  }

  async fn update_spec(&self, application: &Application) -> Result<(), ControllerError> {
    let attempts = self.attempts();
    for _ in 0..attempts {
      let stored = self.load(&application.name).await?;
      if &stored.application == application {
        debug!(app = %application.name, "application_unchanged");
        return Ok(());
      }
      match self
        .store
        .update_application(application, stored.version)
        .await?
      {
        CasResult::Success { .. } => {
          info!(app = %application.name, "application_updated");
          return Ok(());
        }
        CasResult::VersionConflict { actual } => {
          debug!(app = %application.name, actual, "application_update_conflict");
        }
        CasResult::NotFound => {
          return Err(ControllerError::NotFound {
            app: application.name.clone(),
          });
        }
      }
    }
    Err(ControllerError::ConflictRetriesExhausted {
      app: application.name.clone(),
      attempts,
    })
  }

  /// Run one reconciliation pass for an application.
  #[instrument(name = "reconcile", skip(self), fields(app = %name))]
  pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, ControllerError> {
    let attempts = self.attempts();
    for attempt in 1..=attempts {
      let stored = self.load(name).await?;
      let (revision, _) = self.revisions.ensure(&stored.application).await?;

      let mut status = stored.status.clone();
      let current = status.latest_revision.as_ref().map(|r| r.revision);
      if current != Some(revision.revision) {
        info!(
          app = %name,
          from = current.unwrap_or_default(),
          to = revision.revision,
          "revision_changed"
        );
        status.previous_revision = status.latest_revision.take();
        status.latest_revision = Some(revision.to_ref());
        status.workflow = None;
      }

      let previous = match &status.previous_revision {
        Some(prev) => match self.store.get_revision(name, prev.revision).await {
          Ok(rev) => Some(rev),
          Err(vela_store::Error::NotFound(_)) => None,
          Err(e) => return Err(e.into()),
        },
        None => None,
      };

      let policy =
        revision
          .application
          .gc_policy()
          .map_err(|e| ControllerError::InvalidPolicy {
            app: name.to_string(),
            message: e.to_string(),
          })?;

      let plan = self.planner.plan(&PlanContext {
        revision: &revision,
        previous: previous.as_ref(),
      })?;

      let workflow = status
        .workflow
        .take()
        .unwrap_or_else(|| WorkflowStatus::new(&revision.name, plan.mode().steps, self.engine.now()));

      let ctx = self.step_context(&stored, &revision, previous, policy.keep_legacy_resource);
      let outcome = self.engine.run(&plan, workflow, &ctx).await?;

      let phase = outcome.phase();
      status.status = phase;
      if phase == AppPhase::WorkflowSucceeded {
        status.last_succeeded_revision = Some(revision.to_ref());
      }
      status.workflow = Some(outcome.status);

      let written = if status == stored.status {
        false
      } else {
        match self.store.update_status(name, &status, stored.version).await? {
          CasResult::Success { version } => {
            debug!(app = %name, version, "status_written");
            true
          }
          CasResult::VersionConflict { actual } => {
            warn!(app = %name, attempt, expected = stored.version, actual, "status_conflict");
            continue;
          }
          CasResult::NotFound => {
            return Err(ControllerError::NotFound {
              app: name.to_string(),
            });
          }
        }
      };

      if phase == AppPhase::WorkflowSucceeded {
        match self.gc.sweep(name).await {
          Ok(report) if !report.is_complete() => {
            warn!(
              app = %name,
              failed = report.failed.len(),
              deferred = report.deferred.len(),
              "sweep_incomplete"
            );
          }
          Ok(_) => {}
          Err(e) => warn!(app = %name, error = %e, "sweep_failed"),
        }
      }

      return Ok(ReconcileOutcome {
        app: name.to_string(),
        phase,
        revision: revision.name,
        done: outcome.done,
        written,
      });
    }

    Err(ControllerError::ConflictRetriesExhausted {
      app: name.to_string(),
      attempts,
    })
  }

  /// Remove an application: delete its resources, then its records.
  ///
  /// Records are kept when any delete fails so a later call can finish.
  #[instrument(name = "delete_application", skip(self), fields(app = %name))]
  pub async fn delete(&self, name: &str) -> Result<SweepReport, ControllerError> {
    self.load(name).await?;
    let report = self.gc.finalize(name).await?;
    if !report.is_complete() {
      return Err(ControllerError::FinalizeIncomplete {
        app: name.to_string(),
        failed: report.failed.len(),
        deferred: report.deferred.len(),
      });
    }

    for revision in self.store.list_revisions(name).await? {
      self.store.delete_revision(name, revision.revision).await?;
    }
    self.store.delete_application(name).await?;
    info!(app = %name, deleted = report.deleted.len(), "application_deleted");
    Ok(report)
  }

  fn step_context(
    &self,
    stored: &StoredApplication,
    revision: &ApplicationRevision,
    previous: Option<ApplicationRevision>,
    keep_legacy_resource: bool,
  ) -> StepContext {
    let namespace = if stored.application.namespace.is_empty() {
      self.engine.settings().default_namespace.clone()
    } else {
      stored.application.namespace.clone()
    };
    StepContext {
      app_name: stored.application.name.clone(),
      namespace,
      revision: Arc::new(revision.clone()),
      previous_revision: previous.map(Arc::new),
      clusters: self.clusters.clone(),
      renderer: self.renderer.clone(),
      keeper: self.keeper.clone(),
      keep_legacy_resource,
    }
  }

  async fn load(&self, name: &str) -> Result<StoredApplication, ControllerError> {
    match self.store.get_application(name).await {
      Ok(stored) => Ok(stored),
      Err(vela_store::Error::NotFound(_)) => Err(ControllerError::NotFound {
        app: name.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }

  fn attempts(&self) -> u32 {
    self.engine.settings().conflict_retries.max(1)
  }
}
