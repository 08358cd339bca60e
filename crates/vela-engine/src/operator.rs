//! Operator actions on a workflow run.
//!
//! Every action reads the stored application, edits its workflow status and
//! writes it back with compare-and-swap, retrying from fresh state when the
//! controller wrote in between. The engine picks the change up on its next
//! pass.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use vela_config::{ExecutionMode, Settings, WorkflowDef};
use vela_store::{CasResult, RevisionRef, Store, StoredApplication};
use vela_workflow::{AppPhase, Graph, StepPhase, StepStatus, WorkflowStatus, reason};

use crate::clock::{Clock, SystemClock};
use crate::error::OperationError;
use crate::planner::{DefaultPlanner, PlanContext, WorkflowPlanner};

/// Status document of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
  pub name: String,
  pub status: AppPhase,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mode: Option<ExecutionMode>,
  pub finished: bool,
  pub suspend: bool,
  pub terminated: bool,
  /// Revision the run belongs to.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub revision: Option<String>,
  pub steps: Vec<StepStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub latest_revision: Option<RevisionRef>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_succeeded_revision: Option<RevisionRef>,
}

impl WorkflowView {
  pub fn from_stored(stored: &StoredApplication) -> Self {
    let status = &stored.status;
    let workflow = status.workflow.as_ref();
    Self {
      name: stored.application.name.clone(),
      status: status.status,
      mode: workflow.map(|w| w.mode),
      finished: workflow.is_some_and(|w| w.finished),
      suspend: workflow.is_some_and(|w| w.suspend),
      terminated: workflow.is_some_and(|w| w.terminated),
      revision: workflow.map(|w| w.app_revision.clone()),
      steps: workflow.map(|w| w.steps.clone()).unwrap_or_default(),
      start_time: workflow.map(|w| w.start_time),
      end_time: workflow.and_then(|w| w.end_time),
      latest_revision: status.latest_revision.clone(),
      last_succeeded_revision: status.last_succeeded_revision.clone(),
    }
  }
}

/// Status, resume, suspend, terminate, restart and rollback of workflow runs.
#[derive(Clone)]
pub struct WorkflowOperator {
  store: Arc<dyn Store>,
  planner: Arc<dyn WorkflowPlanner>,
  clock: Arc<dyn Clock>,
  conflict_retries: u32,
}

impl WorkflowOperator {
  pub fn new(store: Arc<dyn Store>, settings: &Settings) -> Self {
    Self {
      store,
      planner: Arc::new(DefaultPlanner),
      clock: Arc::new(SystemClock),
      conflict_retries: settings.conflict_retries.max(1),
    }
  }

  /// The planner used to find the steps after a restarted one.
  pub fn with_planner(mut self, planner: Arc<dyn WorkflowPlanner>) -> Self {
    self.planner = planner;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub async fn status(&self, app: &str) -> Result<WorkflowView, OperationError> {
    let stored = self.load(app).await?;
    Ok(WorkflowView::from_stored(&stored))
  }

  /// Continue a suspended run. Returns false when nothing was suspended.
  ///
  /// With a step name only that suspend step is released; the run stays
  /// suspended while another suspend step is still waiting.
  #[instrument(name = "workflow_resume", skip(self), fields(app = %app))]
  pub async fn resume(&self, app: &str, step: Option<&str>) -> Result<bool, OperationError> {
    let now = self.clock.now();
    let resumed = self
      .modify(app, |workflow| {
        if workflow.terminated {
          return Err(OperationError::Terminated {
            app: app.to_string(),
          });
        }
        match step {
          None => {
            if !workflow.suspend {
              return Ok(false);
            }
            workflow.suspend = false;
            Ok(true)
          }
          Some(name) => {
            let status = workflow
              .find_step_mut(name)
              .ok_or_else(|| OperationError::StepNotFound {
                app: app.to_string(),
                step: name.to_string(),
              })?;
            if status.phase != StepPhase::Running
              || status.reason.as_deref() != Some(reason::SUSPEND)
            {
              return Err(OperationError::StepNotSuspended {
                app: app.to_string(),
                step: name.to_string(),
              });
            }
            status.transition(StepPhase::Succeeded, None, None, now);
            if !workflow.has_waiting_suspend() {
              workflow.suspend = false;
            }
            Ok(true)
          }
        }
      })
      .await?;

    if resumed {
      info!(app = %app, step = step.unwrap_or(""), "workflow_resumed");
    }
    Ok(resumed)
  }

  /// Pause a run at the next pass. Returns false when it already was.
  #[instrument(name = "workflow_suspend", skip(self), fields(app = %app))]
  pub async fn suspend(&self, app: &str) -> Result<bool, OperationError> {
    let suspended = self
      .modify(app, |workflow| {
        ensure_active(app, workflow)?;
        if workflow.suspend {
          return Ok(false);
        }
        workflow.suspend = true;
        Ok(true)
      })
      .await?;
    if suspended {
      info!(app = %app, "workflow_suspended_by_operator");
    }
    Ok(suspended)
  }

  /// End a run. Returns false when it was already terminated.
  #[instrument(name = "workflow_terminate", skip(self), fields(app = %app))]
  pub async fn terminate(&self, app: &str) -> Result<bool, OperationError> {
    let now = self.clock.now();
    let terminated = self
      .modify(app, |workflow| {
        if workflow.terminated {
          return Ok(false);
        }
        workflow.for_each_step_mut(|step| {
          let keep = matches!(
            step.reason.as_deref(),
            Some(reason::TIMEOUT) | Some(reason::FAILED_AFTER_RETRIES)
          );
          if step.phase == StepPhase::Failed && !keep {
            step.reason = Some(reason::TERMINATE.to_string());
          }
        });
        workflow.mark_terminated(now);
        Ok(true)
      })
      .await?;
    if terminated {
      info!(app = %app, "workflow_terminated_by_operator");
    }
    Ok(terminated)
  }

  /// Re-run a workflow. Without a step the whole run starts over; with one,
  /// that step and everything after it is cleared.
  #[instrument(name = "workflow_restart", skip(self), fields(app = %app))]
  pub async fn restart(&self, app: &str, step: Option<&str>) -> Result<(), OperationError> {
    let Some(step) = step else {
      return self.clear_workflow(app).await;
    };

    let def = self.current_plan(app).await?;
    let mode = def.mode();
    let targets = restart_targets(&def, step).ok_or_else(|| OperationError::StepNotFound {
      app: app.to_string(),
      step: step.to_string(),
    })?;
    let now = self.clock.now();

    self
      .modify(app, |workflow| {
        match &targets {
          RestartTargets::Steps(names) => {
            workflow.steps.retain(|s| !names.contains(&s.name));
          }
          RestartTargets::SubSteps {
            group,
            sub_steps,
            downstream,
          } => {
            workflow.steps.retain(|s| !downstream.contains(&s.name));
            if let Some(group) = workflow.step_mut(group) {
              group.sub_steps.retain(|s| !sub_steps.contains(&s.name));
              group.transition(StepPhase::Running, None, None, now);
            }
          }
        }
        workflow.mode = mode.steps;
        workflow.terminated = false;
        workflow.finished = false;
        workflow.suspend = false;
        workflow.end_time = None;
        Ok(true)
      })
      .await?;
    info!(app = %app, step = %step, "workflow_restarted");
    Ok(())
  }

  /// Restore the last succeeded revision's spec and start a fresh run.
  #[instrument(name = "workflow_rollback", skip(self), fields(app = %app))]
  pub async fn rollback(&self, app: &str) -> Result<RevisionRef, OperationError> {
    for _ in 0..self.conflict_retries {
      let stored = self.load(app).await?;
      if let Some(workflow) = &stored.status.workflow {
        if !(workflow.suspend || workflow.terminated || workflow.finished) {
          return Err(OperationError::StillRunning {
            app: app.to_string(),
          });
        }
      }
      let target = stored
        .status
        .last_succeeded_revision
        .clone()
        .ok_or_else(|| OperationError::NoSucceededRevision {
          app: app.to_string(),
        })?;
      let revision = self.store.get_revision(app, target.revision).await?;

      let mut version = stored.version;
      if stored.application != revision.application {
        match self
          .store
          .update_application(&revision.application, version)
          .await?
        {
          CasResult::Success { version: next } => version = next,
          CasResult::VersionConflict { .. } => continue,
          CasResult::NotFound => {
            return Err(OperationError::NotFound {
              app: app.to_string(),
            });
          }
        }
      }

      let mut status = stored.status.clone();
      status.workflow = None;
      status.status = AppPhase::Running;
      match self.store.update_status(app, &status, version).await? {
        CasResult::Success { .. } => {
          info!(app = %app, revision = %target.name, "workflow_rolled_back");
          return Ok(target);
        }
        CasResult::VersionConflict { .. } => continue,
        CasResult::NotFound => {
          return Err(OperationError::NotFound {
            app: app.to_string(),
          });
        }
      }
    }
    Err(OperationError::ConflictRetriesExhausted {
      app: app.to_string(),
      attempts: self.conflict_retries,
    })
  }

  async fn clear_workflow(&self, app: &str) -> Result<(), OperationError> {
    for _ in 0..self.conflict_retries {
      let stored = self.load(app).await?;
      let mut status = stored.status.clone();
      if status.workflow.take().is_none() {
        return Err(OperationError::NoWorkflow {
          app: app.to_string(),
        });
      }
      status.status = AppPhase::Running;
      match self.store.update_status(app, &status, stored.version).await? {
        CasResult::Success { .. } => {
          info!(app = %app, "workflow_restarted");
          return Ok(());
        }
        CasResult::VersionConflict { .. } => continue,
        CasResult::NotFound => {
          return Err(OperationError::NotFound {
            app: app.to_string(),
          });
        }
      }
    }
    Err(OperationError::ConflictRetriesExhausted {
      app: app.to_string(),
      attempts: self.conflict_retries,
    })
  }

  /// The workflow the controller runs for the current revision.
  async fn current_plan(&self, app: &str) -> Result<WorkflowDef, OperationError> {
    let stored = self.load(app).await?;
    let latest = stored
      .status
      .latest_revision
      .as_ref()
      .ok_or_else(|| OperationError::NoWorkflow {
        app: app.to_string(),
      })?;
    let revision = self.store.get_revision(app, latest.revision).await?;
    let previous = match &stored.status.previous_revision {
      Some(prev) => match self.store.get_revision(app, prev.revision).await {
        Ok(rev) => Some(rev),
        Err(vela_store::Error::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
      },
      None => None,
    };
    Ok(self.planner.plan(&PlanContext {
      revision: &revision,
      previous: previous.as_ref(),
    })?)
  }

  /// Apply `edit` to the stored workflow status with CAS, retrying on conflict.
  ///
  /// `edit` returns whether it changed anything; unchanged statuses are not written.
  async fn modify<F>(&self, app: &str, mut edit: F) -> Result<bool, OperationError>
  where
    F: FnMut(&mut WorkflowStatus) -> Result<bool, OperationError> + Send,
  {
    for _ in 0..self.conflict_retries {
      let stored = self.load(app).await?;
      let mut status = stored.status.clone();
      let Some(workflow) = status.workflow.as_mut() else {
        return Err(OperationError::NoWorkflow {
          app: app.to_string(),
        });
      };
      if !edit(workflow)? {
        return Ok(false);
      }
      status.status = workflow.phase();

      match self.store.update_status(app, &status, stored.version).await? {
        CasResult::Success { .. } => return Ok(true),
        CasResult::VersionConflict { .. } => continue,
        CasResult::NotFound => {
          return Err(OperationError::NotFound {
            app: app.to_string(),
          });
        }
      }
    }
    Err(OperationError::ConflictRetriesExhausted {
      app: app.to_string(),
      attempts: self.conflict_retries,
    })
  }

  async fn load(&self, app: &str) -> Result<StoredApplication, OperationError> {
    match self.store.get_application(app).await {
      Ok(stored) => Ok(stored),
      Err(vela_store::Error::NotFound(_)) => Err(OperationError::NotFound {
        app: app.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }
}

fn ensure_active(app: &str, workflow: &WorkflowStatus) -> Result<(), OperationError> {
  if workflow.terminated {
    return Err(OperationError::Terminated {
      app: app.to_string(),
    });
  }
  if workflow.finished {
    return Err(OperationError::Finished {
      app: app.to_string(),
    });
  }
  Ok(())
}

enum RestartTargets {
  /// Top-level steps to clear.
  Steps(HashSet<String>),
  /// Sub-steps of one group to clear, plus the top-level steps after the group.
  SubSteps {
    group: String,
    sub_steps: HashSet<String>,
    downstream: HashSet<String>,
  },
}

fn restart_targets(def: &WorkflowDef, step: &str) -> Option<RestartTargets> {
  let mode = def.mode();
  let top = Graph::new(&def.steps, mode.steps);
  if def.steps.iter().any(|s| s.name == step) {
    return Some(RestartTargets::Steps(top.descendants(step)));
  }

  let group = def
    .steps
    .iter()
    .find(|g| g.sub_steps.iter().any(|s| s.name == step))?;
  let inner = Graph::new(&group.sub_steps, mode.sub_steps);
  let mut downstream = top.descendants(&group.name);
  downstream.remove(&group.name);
  Some(RestartTargets::SubSteps {
    group: group.name.clone(),
    sub_steps: inner.descendants(step),
    downstream,
  })
}
