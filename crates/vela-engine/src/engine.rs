//! Workflow execution engine.
//!
//! The `WorkflowEngine` advances a workflow by one reconciliation pass. It
//! executes every ready step, in parallel when the graph allows it, and
//! merges the results back into the persisted status. Persisted status is
//! the only record of progress: nothing is held across passes.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use vela_config::{ExecutionMode, Settings, StepDef, WorkflowDef};
use vela_steps::{StepContext, StepError, StepExecutor, StepInvocation, StepOutcome, StepRegistry};
use vela_workflow::{
  AppPhase, Graph, StepPhase, StepStatus, WorkflowStatus, aggregate_sub_steps, reason, validate,
};

use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::expr::{ALWAYS, bind_inputs, evaluate_condition, export_outputs};

/// Result of one engine pass.
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub status: WorkflowStatus,
  /// The run finished, successfully or not.
  pub done: bool,
  /// Whether the pass changed the status.
  pub changed: bool,
}

impl RunOutcome {
  pub fn phase(&self) -> AppPhase {
    self.status.phase()
  }
}

/// Mutable state shared by every scope of one pass.
struct Pass {
  app: String,
  now: DateTime<Utc>,
  suspend: bool,
  terminate: bool,
  /// A step parked in a suspend succeeded or failed during this pass.
  left_suspend: bool,
  context: BTreeMap<String, serde_json::Value>,
  /// Leaf steps already executed this pass, by scoped name.
  executed: HashSet<String>,
  /// Groups already entered since the last suspend release.
  groups_visited: HashSet<String>,
}

enum Readiness {
  NotReady,
  Ready,
  Skip,
  ConditionError(String),
}

enum Prepared {
  /// Resolved without running the executor.
  Done(StepStatus),
  Run {
    status: StepStatus,
    invocation: StepInvocation,
    executor: Arc<dyn StepExecutor>,
  },
}

type StepResult = Result<Result<StepOutcome, StepError>, tokio::task::JoinError>;

/// The workflow execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification strategies.
/// Use `WorkflowEngine::new()` for an engine with no-op notifications,
/// or `WorkflowEngine::with_notifier()` to provide a custom notifier.
pub struct WorkflowEngine<N: ExecutionNotifier = NoopNotifier> {
  registry: Arc<dyn StepRegistry>,
  clock: Arc<dyn Clock>,
  settings: Settings,
  notifier: N,
}

impl WorkflowEngine<NoopNotifier> {
  pub fn new(registry: Arc<dyn StepRegistry>, settings: Settings) -> Self {
    Self::with_notifier(registry, settings, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> WorkflowEngine<N> {
  pub fn with_notifier(registry: Arc<dyn StepRegistry>, settings: Settings, notifier: N) -> Self {
    Self {
      registry,
      clock: Arc::new(SystemClock),
      settings,
      notifier,
    }
  }

  /// Replace the clock (tests drive time through a [`crate::ManualClock`]).
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  pub fn clock(&self) -> Arc<dyn Clock> {
    self.clock.clone()
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  /// Reject malformed workflows before anything executes.
  pub fn validate(&self, def: &WorkflowDef) -> Result<(), EngineError> {
    validate(def, |step_type| self.registry.contains(step_type))?;
    Ok(())
  }

  /// Advance the workflow by one reconciliation pass.
  ///
  /// Repeated calls with no external change return the status unchanged once
  /// it is stable. Finished and terminated runs are returned as they are.
  #[instrument(
    name = "workflow_run",
    skip_all,
    fields(app = %ctx.app_name, revision = %status.app_revision)
  )]
  pub async fn run(
    &self,
    def: &WorkflowDef,
    mut status: WorkflowStatus,
    ctx: &StepContext,
  ) -> Result<RunOutcome, EngineError> {
    self.validate(def)?;
    if status.finished || status.terminated {
      return Ok(RunOutcome {
        status,
        done: true,
        changed: false,
      });
    }

    let original = status.clone();
    let mode = def.mode();
    let mut pass = Pass {
      app: ctx.app_name.clone(),
      now: self.clock.now(),
      suspend: status.suspend,
      terminate: false,
      left_suspend: false,
      context: std::mem::take(&mut status.context),
      executed: HashSet::new(),
      groups_visited: HashSet::new(),
    };

    loop {
      pass.left_suspend = false;
      self
        .run_scope(
          &def.steps,
          mode.steps,
          mode.sub_steps,
          &mut status.steps,
          "",
          &mut pass,
          ctx,
        )
        .await?;

      status.suspend = pass.suspend;
      if pass.suspend && pass.left_suspend && !pass.terminate && !status.has_waiting_suspend() {
        // Auto-resumed: nothing else is waiting, so the rest may proceed.
        info!(app = %pass.app, "workflow_auto_resumed");
        pass.suspend = false;
        pass.groups_visited.clear();
        continue;
      }
      break;
    }

    status.context = pass.context;
    status.suspend = pass.suspend;
    self.settle(&def.steps, &mut status, pass.terminate, pass.now);
    self.announce_workflow(&original, &status, &pass.app);

    let changed = status != original;
    Ok(RunOutcome {
      done: status.finished,
      changed,
      status,
    })
  }

  /// Run one scope (top-level steps or a group's sub-steps) until nothing new is ready.
  #[allow(clippy::too_many_arguments)]
  fn run_scope<'a>(
    &'a self,
    steps: &'a [StepDef],
    mode: ExecutionMode,
    sub_mode: ExecutionMode,
    statuses: &'a mut Vec<StepStatus>,
    prefix: &'a str,
    pass: &'a mut Pass,
    ctx: &'a StepContext,
  ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
    Box::pin(async move {
      let graph = Graph::new(steps, mode);

      loop {
        if pass.terminate {
          break;
        }

        let mut leaves = Vec::new();
        let mut groups = Vec::new();
        let mut progressed = false;

        for step in steps {
          let key = format!("{}{}", prefix, step.name);
          let seen = if step.is_group() {
            pass.groups_visited.contains(&key)
          } else {
            pass.executed.contains(&key)
          };
          if seen {
            continue;
          }

          match self.readiness(step, &graph, statuses, pass) {
            Readiness::NotReady => {}
            Readiness::Skip => {
              let mut status = StepStatus::started(&step.name, &step.step_type, pass.now);
              status.transition(StepPhase::Skipped, Some(reason::SKIP), None, pass.now);
              pass.executed.insert(key.clone());
              pass.groups_visited.insert(key);
              self.record(statuses, status, pass);
              progressed = true;
            }
            Readiness::ConditionError(message) => {
              let mut status = StepStatus::started(&step.name, &step.step_type, pass.now);
              status.transition(StepPhase::Failed, Some(reason::EXECUTE), Some(message), pass.now);
              pass.executed.insert(key.clone());
              pass.groups_visited.insert(key);
              self.record(statuses, status, pass);
              progressed = true;
            }
            Readiness::Ready if step.is_group() => {
              pass.groups_visited.insert(key);
              groups.push(step);
            }
            Readiness::Ready => {
              pass.executed.insert(key);
              leaves.push(step);
            }
          }
        }

        if leaves.is_empty() && groups.is_empty() {
          if progressed {
            continue;
          }
          break;
        }

        let mut pending = Vec::with_capacity(leaves.len());
        let mut handles = Vec::with_capacity(leaves.len());
        for step in leaves {
          match self.prepare(step, statuses, pass)? {
            Prepared::Done(status) => self.record(statuses, status, pass),
            Prepared::Run {
              status,
              invocation,
              executor,
            } => {
              let ctx = ctx.clone();
              pending.push((step, status));
              handles.push(tokio::spawn(async move {
                executor.execute(&invocation, &ctx).await
              }));
            }
          }
        }

        // Groups run while the spawned leaves are in flight.
        for step in groups {
          let status = self
            .run_group(step, sub_mode, statuses, prefix, pass, ctx)
            .await?;
          self.record(statuses, status, pass);
        }

        let results: Vec<StepResult> = join_all(handles).await;
        for ((step, status), result) in pending.into_iter().zip(results) {
          let status = self.finish(step, status, result, pass);
          self.record(statuses, status, pass);
        }
      }

      Ok(())
    })
  }

  fn readiness(
    &self,
    step: &StepDef,
    graph: &Graph,
    statuses: &[StepStatus],
    pass: &Pass,
  ) -> Readiness {
    if let Some(existing) = statuses.iter().find(|s| s.name == step.name) {
      if existing.phase.is_terminal() {
        return Readiness::NotReady;
      }
      // While suspended only parked steps are looked at, to evaluate their deadlines.
      if pass.suspend && !is_parked(existing) {
        return Readiness::NotReady;
      }
      return Readiness::Ready;
    }
    if pass.suspend {
      return Readiness::NotReady;
    }

    let deps: Vec<StepPhase> = graph
      .upstream(&step.name)
      .iter()
      .map(|dep| {
        statuses
          .iter()
          .find(|s| &s.name == dep)
          .map(|s| s.phase)
          .unwrap_or(StepPhase::Pending)
      })
      .collect();

    match step.condition.as_deref().map(str::trim) {
      None => {
        if deps.iter().all(|p| p.is_satisfied()) {
          Readiness::Ready
        } else {
          Readiness::NotReady
        }
      }
      Some(_) if !deps.iter().all(|p| p.is_terminal()) => Readiness::NotReady,
      Some(ALWAYS) => Readiness::Ready,
      Some(condition) => match evaluate_condition(condition, statuses, &pass.context) {
        Ok(true) => Readiness::Ready,
        Ok(false) => Readiness::Skip,
        Err(message) => Readiness::ConditionError(message),
      },
    }
  }

  fn prepare(
    &self,
    step: &StepDef,
    statuses: &[StepStatus],
    pass: &Pass,
  ) -> Result<Prepared, EngineError> {
    let existing = statuses.iter().find(|s| s.name == step.name).cloned();
    let first_run = existing.is_none();
    let mut status =
      existing.unwrap_or_else(|| StepStatus::started(&step.name, &step.step_type, pass.now));
    if first_run {
      self.announce_started(&status, pass);
    }

    if fail_if_timed_out(step, &mut status, pass.now, pass.now) {
      return Ok(Prepared::Done(status));
    }

    let properties = match bind_inputs(&step.properties, &step.inputs, &pass.context) {
      Ok(properties) => properties,
      Err(message) => {
        status.transition(
          StepPhase::Failed,
          Some(reason::PROCESS_PARAMETER),
          Some(message),
          pass.now,
        );
        return Ok(Prepared::Done(status));
      }
    };

    let executor =
      self
        .registry
        .get(&step.step_type)
        .ok_or_else(|| EngineError::MissingExecutor {
          step_type: step.step_type.clone(),
        })?;

    let invocation = StepInvocation {
      name: step.name.clone(),
      step_type: step.step_type.clone(),
      properties,
      first_execute_time: status.first_execute_time,
      now: pass.now,
      first_run,
      suspended: pass.suspend,
    };
    Ok(Prepared::Run {
      status,
      invocation,
      executor,
    })
  }

  /// Apply an executor result to the step status.
  fn finish(
    &self,
    step: &StepDef,
    mut status: StepStatus,
    result: StepResult,
    pass: &mut Pass,
  ) -> StepStatus {
    let now = pass.now;
    // Timeout wins over whatever the executor reported.
    if fail_if_timed_out(step, &mut status, self.clock.now(), now) {
      return status;
    }

    match result {
      Err(join_err) => {
        status.transition(
          StepPhase::Failed,
          Some(reason::EXECUTE),
          Some(format!("step task aborted: {}", join_err)),
          now,
        );
      }
      Ok(Ok(StepOutcome::Succeeded { output })) => match export_outputs(&step.outputs, &output) {
        Ok(vars) => {
          pass.context.extend(vars);
          status.transition(StepPhase::Succeeded, None, None, now);
        }
        Err(message) => {
          status.transition(StepPhase::Failed, Some(reason::OUTPUT), Some(message), now);
        }
      },
      Ok(Ok(StepOutcome::Wait { message })) => {
        status.transition(StepPhase::Running, Some(reason::WAIT), Some(message), now);
      }
      Ok(Ok(StepOutcome::Suspend { message })) => {
        pass.suspend = true;
        status.transition(StepPhase::Running, Some(reason::SUSPEND), message, now);
      }
      Ok(Ok(StepOutcome::Failed { message })) => {
        status.transition(StepPhase::Failed, Some(reason::EXECUTE), Some(message), now);
      }
      Ok(Ok(StepOutcome::Terminate { message })) => {
        pass.terminate = true;
        status.transition(StepPhase::Failed, Some(reason::TERMINATE), Some(message), now);
      }
      Ok(Err(err)) if err.is_transient() => {
        status.retries += 1;
        if status.retries > self.settings.max_step_errors {
          status.transition(
            StepPhase::Failed,
            Some(reason::FAILED_AFTER_RETRIES),
            Some(err.to_string()),
            now,
          );
        } else {
          warn!(
            app = %pass.app,
            step = %step.name,
            retries = status.retries,
            error = %err,
            "step_retrying"
          );
          status.transition(StepPhase::Running, None, Some(err.to_string()), now);
        }
      }
      Ok(Err(err)) => {
        status.transition(
          StepPhase::Failed,
          Some(reason::EXECUTE),
          Some(err.to_string()),
          now,
        );
      }
    }
    status
  }

  async fn run_group(
    &self,
    step: &StepDef,
    sub_mode: ExecutionMode,
    statuses: &[StepStatus],
    prefix: &str,
    pass: &mut Pass,
    ctx: &StepContext,
  ) -> Result<StepStatus, EngineError> {
    let existing = statuses.iter().find(|s| s.name == step.name).cloned();
    let first_run = existing.is_none();
    let mut status =
      existing.unwrap_or_else(|| StepStatus::started(&step.name, &step.step_type, pass.now));
    if first_run {
      self.announce_started(&status, pass);
    }

    if fail_if_timed_out(step, &mut status, pass.now, pass.now) {
      return Ok(status);
    }

    let sub_prefix = format!("{}{}/", prefix, step.name);
    self
      .run_scope(
        &step.sub_steps,
        sub_mode,
        sub_mode,
        &mut status.sub_steps,
        &sub_prefix,
        pass,
        ctx,
      )
      .await?;

    if fail_if_timed_out(step, &mut status, self.clock.now(), pass.now) {
      return Ok(status);
    }

    // With nothing running and a failure present, sub-steps without a status
    // are blocked behind it and will never run.
    let stalled = !pass.suspend
      && !status
        .sub_steps
        .iter()
        .any(|s| s.phase == StepPhase::Running)
      && status
        .sub_steps
        .iter()
        .any(|s| s.phase == StepPhase::Failed);
    let expected = if stalled {
      status.sub_steps.len()
    } else {
      step.sub_steps.len()
    };

    let (phase, group_reason) = aggregate_sub_steps(expected, &status.sub_steps);
    let message = match phase {
      StepPhase::Failed => status
        .sub_steps
        .iter()
        .filter(|s| s.phase == StepPhase::Failed)
        .map(|s| format!("{}: {}", s.name, s.message.as_deref().unwrap_or("failed")))
        .next(),
      _ => None,
    };
    status.transition(phase, group_reason.as_deref(), message, pass.now);
    Ok(status)
  }

  /// Decide the run outcome after a pass.
  fn settle(
    &self,
    steps: &[StepDef],
    status: &mut WorkflowStatus,
    terminate: bool,
    now: DateTime<Utc>,
  ) {
    let all_satisfied = steps.iter().all(|step| {
      status
        .step(&step.name)
        .is_some_and(|s| s.phase.is_satisfied())
    });
    if all_satisfied {
      status.finished = true;
      status.suspend = false;
      status.end_time = Some(now);
      return;
    }

    let failed = status.steps.iter().any(|s| s.phase == StepPhase::Failed);
    let running = status.steps.iter().any(|s| s.phase == StepPhase::Running);
    if terminate || (failed && !running && !status.suspend) {
      status.mark_terminated(now);
    }
  }

  /// Insert or replace a status, announcing phase or reason changes.
  fn record(&self, statuses: &mut Vec<StepStatus>, status: StepStatus, pass: &mut Pass) {
    let slot = statuses.iter_mut().find(|s| s.name == status.name);
    let changed = slot
      .as_ref()
      .is_none_or(|before| before.phase != status.phase || before.reason != status.reason);
    if slot.as_ref().is_some_and(|before| is_parked(before)) && !is_parked(&status) {
      pass.left_suspend = true;
    }
    if changed {
      self.announce_step(&status, pass);
    }
    match slot {
      Some(existing) => *existing = status,
      None => statuses.push(status),
    }
  }

  fn announce_started(&self, status: &StepStatus, pass: &Pass) {
    info!(app = %pass.app, step = %status.name, step_type = %status.step_type, "step_started");
    self.notifier.notify(ExecutionEvent::StepStarted {
      app: pass.app.clone(),
      step: status.name.clone(),
    });
  }

  fn announce_step(&self, status: &StepStatus, pass: &Pass) {
    let app = pass.app.clone();
    let step = status.name.clone();
    match status.phase {
      StepPhase::Succeeded => {
        info!(app = %app, step = %step, "step_succeeded");
        self
          .notifier
          .notify(ExecutionEvent::StepSucceeded { app, step });
      }
      StepPhase::Failed => {
        let failure = status.reason.clone().unwrap_or_default();
        warn!(
          app = %app,
          step = %step,
          reason = %failure,
          message = status.message.as_deref().unwrap_or(""),
          "step_failed"
        );
        self.notifier.notify(ExecutionEvent::StepFailed {
          app,
          step,
          reason: failure,
          message: status.message.clone(),
        });
      }
      StepPhase::Skipped => {
        info!(app = %app, step = %step, "step_skipped");
        self.notifier.notify(ExecutionEvent::StepSkipped { app, step });
      }
      StepPhase::Running if status.reason.is_some() => {
        debug!(
          app = %app,
          step = %step,
          reason = status.reason.as_deref().unwrap_or(""),
          "step_waiting"
        );
        self.notifier.notify(ExecutionEvent::StepWaiting {
          app,
          step,
          message: status.message.clone(),
        });
      }
      StepPhase::Running | StepPhase::Pending => {}
    }
  }

  fn announce_workflow(&self, before: &WorkflowStatus, after: &WorkflowStatus, app: &str) {
    if before.phase() == after.phase() {
      return;
    }
    let app = app.to_string();
    let revision = after.app_revision.clone();
    match after.phase() {
      AppPhase::WorkflowSucceeded => {
        info!(app = %app, revision = %revision, "workflow_succeeded");
        self
          .notifier
          .notify(ExecutionEvent::WorkflowSucceeded { app, revision });
      }
      AppPhase::WorkflowTerminated => {
        warn!(app = %app, revision = %revision, "workflow_terminated");
        self
          .notifier
          .notify(ExecutionEvent::WorkflowTerminated { app, revision });
      }
      AppPhase::Suspending => {
        info!(app = %app, revision = %revision, "workflow_suspended");
        self
          .notifier
          .notify(ExecutionEvent::WorkflowSuspended { app, revision });
      }
      AppPhase::Running => {}
    }
  }
}

/// Parked in a suspend, directly or through a sub-step.
fn is_parked(status: &StepStatus) -> bool {
  status.phase == StepPhase::Running
    && (status.reason.as_deref() == Some(reason::SUSPEND) || status.sub_steps.iter().any(is_parked))
}

/// Fail the step (and its running sub-steps) with `Timeout` if its deadline
/// has passed at `checked_at`. Returns whether it did.
fn fail_if_timed_out(
  step: &StepDef,
  status: &mut StepStatus,
  checked_at: DateTime<Utc>,
  now: DateTime<Utc>,
) -> bool {
  let Some(timeout) = step.timeout_duration().ok().flatten() else {
    return false;
  };
  let Ok(timeout) = chrono::Duration::from_std(timeout) else {
    return false;
  };
  if checked_at - status.first_execute_time <= timeout {
    return false;
  }

  let message = format!(
    "step timed out after {}",
    step.timeout.as_deref().unwrap_or_default()
  );
  for sub in &mut status.sub_steps {
    if matches!(sub.phase, StepPhase::Running | StepPhase::Pending) {
      sub.transition(
        StepPhase::Failed,
        Some(reason::TIMEOUT),
        Some(message.clone()),
        now,
      );
    }
  }
  status.transition(StepPhase::Failed, Some(reason::TIMEOUT), Some(message), now);
  true
}
