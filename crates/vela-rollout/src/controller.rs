use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use vela_engine::{OperationError, WorkflowOperator};
use vela_store::{ApplicationRevision, Error as StoreError, RevisionRef, Store};
use vela_workflow::{AppPhase, StepPhase};

use crate::planner::{plan_batches, workload_name};
use crate::{RolloutError, RolloutPolicy};

/// Progress of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
  pub index: usize,
  pub replicas: u32,
  pub traffic_weight: u32,
  /// `None` until the batch step has started.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phase: Option<StepPhase>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
  pub app: String,
  pub phase: AppPhase,
  pub component: String,
  pub paused: bool,
  pub target_revision: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_revision: Option<String>,
  pub target_workload: String,
  pub batches: Vec<BatchStatus>,
  /// Index of the latest batch that has started.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub current_batch: Option<usize>,
  /// Target replicas of the latest succeeded batch.
  pub upgraded_replicas: u32,
}

/// Operator actions on a rollout.
///
/// Pause and resume only toggle the workflow's `suspend` flag; the batches
/// themselves are driven by the workflow engine.
#[derive(Clone)]
pub struct RolloutController {
  store: Arc<dyn Store>,
  operator: WorkflowOperator,
}

impl RolloutController {
  pub fn new(store: Arc<dyn Store>, operator: WorkflowOperator) -> Self {
    Self { store, operator }
  }

  pub async fn pause(&self, app: &str) -> Result<bool, RolloutError> {
    let changed = self.operator.suspend(app).await?;
    if changed {
      info!(app = %app, "rollout_paused");
    }
    Ok(changed)
  }

  pub async fn resume(&self, app: &str) -> Result<bool, RolloutError> {
    let changed = self.operator.resume(app, None).await?;
    if changed {
      info!(app = %app, "rollout_resumed");
    }
    Ok(changed)
  }

  /// Re-target the last succeeded revision; the next reconcile rolls back
  /// with the same batches, source and target swapped.
  pub async fn rollback(&self, app: &str) -> Result<RevisionRef, RolloutError> {
    let target = self.operator.rollback(app).await?;
    info!(app = %app, revision = %target.name, "rollout_rolled_back");
    Ok(target)
  }

  pub async fn status(&self, app: &str) -> Result<RolloutStatus, RolloutError> {
    let stored = match self.store.get_application(app).await {
      Ok(stored) => stored,
      Err(StoreError::NotFound(_)) => {
        return Err(OperationError::NotFound { app: app.to_string() }.into());
      }
      Err(err) => return Err(err.into()),
    };
    let status = &stored.status;
    let Some(latest) = &status.latest_revision else {
      return Err(OperationError::NoWorkflow { app: app.to_string() }.into());
    };
    let target = self.store.get_revision(app, latest.revision).await?;
    let previous = match &status.previous_revision {
      Some(prev) => self.revision(app, prev.revision).await?,
      None => None,
    };

    let policy = RolloutPolicy::from_application(&target.application)?.ok_or_else(|| {
      RolloutError::NoRolloutPolicy {
        app: app.to_string(),
      }
    })?;
    let (source, batches) = plan_batches(&policy, &target, previous.as_ref())?;

    let workflow = status.workflow.as_ref();
    let batches: Vec<BatchStatus> = batches
      .iter()
      .map(|batch| BatchStatus {
        index: batch.index,
        replicas: batch.replicas,
        traffic_weight: batch.traffic_weight,
        phase: workflow
          .and_then(|w| w.step(&format!("rollout-batch-{}", batch.index)))
          .map(|s| s.phase),
      })
      .collect();

    let current_batch = batches.iter().rev().find(|b| b.phase.is_some()).map(|b| b.index);
    let upgraded_replicas = batches
      .iter()
      .rev()
      .find(|b| b.phase == Some(StepPhase::Succeeded))
      .map_or(0, |b| b.replicas);

    Ok(RolloutStatus {
      app: app.to_string(),
      phase: status.status,
      component: policy.component.clone(),
      paused: workflow.is_some_and(|w| w.suspend),
      target_revision: target.name.clone(),
      source_revision: source.map(|s| s.name.clone()),
      target_workload: workload_name(&policy.component, target.revision),
      batches,
      current_batch,
      upgraded_replicas,
    })
  }

  async fn revision(&self, app: &str, revision: u64) -> Result<Option<ApplicationRevision>, RolloutError> {
    match self.store.get_revision(app, revision).await {
      Ok(revision) => Ok(Some(revision)),
      Err(StoreError::NotFound(_)) => Ok(None),
      Err(err) => Err(err.into()),
    }
  }
}
