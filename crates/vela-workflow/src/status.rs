use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vela_config::ExecutionMode;

/// Reasons recorded on a step status.
pub mod reason {
  pub const WAIT: &str = "Wait";
  pub const SUSPEND: &str = "Suspend";
  pub const TIMEOUT: &str = "Timeout";
  pub const SKIP: &str = "Skip";
  pub const EXECUTE: &str = "Execute";
  pub const TERMINATE: &str = "Terminate";
  pub const PROCESS_PARAMETER: &str = "ProcessParameter";
  pub const OUTPUT: &str = "Output";
  pub const FAILED_AFTER_RETRIES: &str = "FailedAfterRetries";
}

/// Phase of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl StepPhase {
  /// The step will not change phase again within this run.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
  }

  /// Dependents without an `if` may proceed.
  pub fn is_satisfied(self) -> bool {
    matches!(self, Self::Succeeded | Self::Skipped)
  }
}

/// Top-level status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppPhase {
  Running,
  WorkflowTerminated,
  WorkflowSucceeded,
  Suspending,
}

/// Persisted status of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub step_type: String,
  pub phase: StepPhase,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub first_execute_time: DateTime<Utc>,
  pub last_execute_time: DateTime<Utc>,
  /// Transient errors seen so far.
  #[serde(default, skip_serializing_if = "is_zero")]
  pub retries: u32,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sub_steps: Vec<StepStatus>,
}

fn is_zero(n: &u32) -> bool {
  *n == 0
}

impl StepStatus {
  /// Status for a step that begins executing now.
  pub fn started(name: impl Into<String>, step_type: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().simple().to_string()[..10].to_string(),
      name: name.into(),
      step_type: step_type.into(),
      phase: StepPhase::Running,
      reason: None,
      message: None,
      first_execute_time: now,
      last_execute_time: now,
      retries: 0,
      sub_steps: Vec::new(),
    }
  }

  /// Move to a phase; `last_execute_time` only moves when something changed.
  ///
  /// Returns whether the status changed.
  pub fn transition(
    &mut self,
    phase: StepPhase,
    reason: Option<&str>,
    message: Option<String>,
    now: DateTime<Utc>,
  ) -> bool {
    let reason = reason.map(String::from);
    if self.phase == phase && self.reason == reason && self.message == message {
      return false;
    }
    self.phase = phase;
    self.reason = reason;
    self.message = message;
    self.last_execute_time = now;
    true
  }

  pub fn sub_step(&self, name: &str) -> Option<&StepStatus> {
    self.sub_steps.iter().find(|s| s.name == name)
  }

  /// Insert or replace a sub-step status by name.
  pub fn upsert_sub_step(&mut self, status: StepStatus) {
    upsert(&mut self.sub_steps, status);
  }
}

/// Persisted status of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
  /// Revision this run executes.
  pub app_revision: String,
  pub mode: ExecutionMode,
  pub suspend: bool,
  pub terminated: bool,
  pub finished: bool,
  #[serde(default)]
  pub steps: Vec<StepStatus>,
  /// Values exported by step outputs.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub context: BTreeMap<String, serde_json::Value>,
  pub start_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowStatus {
  /// A fresh run of a revision.
  pub fn new(app_revision: impl Into<String>, mode: ExecutionMode, now: DateTime<Utc>) -> Self {
    Self {
      app_revision: app_revision.into(),
      mode,
      suspend: false,
      terminated: false,
      finished: false,
      steps: Vec::new(),
      context: BTreeMap::new(),
      start_time: now,
      end_time: None,
    }
  }

  pub fn step(&self, name: &str) -> Option<&StepStatus> {
    self.steps.iter().find(|s| s.name == name)
  }

  pub fn step_mut(&mut self, name: &str) -> Option<&mut StepStatus> {
    self.steps.iter_mut().find(|s| s.name == name)
  }

  /// Insert or replace a step status by name.
  pub fn upsert_step(&mut self, status: StepStatus) {
    upsert(&mut self.steps, status);
  }

  /// Derived application status.
  pub fn phase(&self) -> AppPhase {
    if self.terminated {
      AppPhase::WorkflowTerminated
    } else if self.finished {
      AppPhase::WorkflowSucceeded
    } else if self.suspend {
      AppPhase::Suspending
    } else {
      AppPhase::Running
    }
  }

  /// Iterate over every step and sub-step status.
  pub fn all_steps(&self) -> impl Iterator<Item = &StepStatus> {
    self
      .steps
      .iter()
      .flat_map(|s| std::iter::once(s).chain(s.sub_steps.iter()))
  }

  /// Find a step or sub-step status by name.
  pub fn find_step_mut(&mut self, name: &str) -> Option<&mut StepStatus> {
    for step in &mut self.steps {
      if step.name == name {
        return Some(step);
      }
      if let Some(sub) = step.sub_steps.iter_mut().find(|s| s.name == name) {
        return Some(sub);
      }
    }
    None
  }

  /// Whether any step is parked in a suspend.
  pub fn has_waiting_suspend(&self) -> bool {
    self
      .all_steps()
      .any(|s| s.phase == StepPhase::Running && s.reason.as_deref() == Some(reason::SUSPEND))
  }

  /// End the run as terminated. Running steps fail with `Terminate`.
  pub fn mark_terminated(&mut self, now: DateTime<Utc>) {
    self.terminated = true;
    self.finished = true;
    self.suspend = false;
    self.end_time = Some(now);
    self.for_each_step_mut(|step| {
      if matches!(step.phase, StepPhase::Running | StepPhase::Pending) {
        let message = step.message.clone();
        step.transition(StepPhase::Failed, Some(reason::TERMINATE), message, now);
      }
    });
  }

  /// Visit every step and sub-step status mutably.
  pub fn for_each_step_mut(&mut self, mut f: impl FnMut(&mut StepStatus)) {
    for step in &mut self.steps {
      f(step);
      for sub in &mut step.sub_steps {
        f(sub);
      }
    }
  }
}

fn upsert(list: &mut Vec<StepStatus>, status: StepStatus) {
  match list.iter_mut().find(|s| s.name == status.name) {
    Some(existing) => *existing = status,
    None => list.push(status),
  }
}

/// Aggregate the phase of a step group from its sub-step statuses.
///
/// Evaluated in order: missing or unfinished sub-steps keep the group running;
/// any failure fails it with the most significant reason; all skipped skips it;
/// otherwise it succeeded.
pub fn aggregate_sub_steps(expected: usize, subs: &[StepStatus]) -> (StepPhase, Option<String>) {
  if subs.len() < expected {
    return (StepPhase::Running, None);
  }
  if subs
    .iter()
    .any(|s| matches!(s.phase, StepPhase::Pending | StepPhase::Running))
  {
    return (StepPhase::Running, None);
  }

  let failed: Vec<&StepStatus> = subs
    .iter()
    .filter(|s| s.phase == StepPhase::Failed)
    .collect();
  if !failed.is_empty() {
    let reason = failed
      .iter()
      .filter_map(|s| s.reason.as_deref())
      .max_by_key(|r| failure_priority(r))
      .unwrap_or(reason::EXECUTE);
    return (StepPhase::Failed, Some(reason.to_string()));
  }

  if !subs.is_empty() && subs.iter().all(|s| s.phase == StepPhase::Skipped) {
    return (StepPhase::Skipped, Some(reason::SKIP.to_string()));
  }

  (StepPhase::Succeeded, None)
}

fn failure_priority(reason: &str) -> u8 {
  match reason {
    reason::FAILED_AFTER_RETRIES => 4,
    reason::TIMEOUT => 3,
    reason::EXECUTE => 2,
    reason::TERMINATE => 1,
    _ => 0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sub(name: &str, phase: StepPhase, reason: Option<&str>) -> StepStatus {
    let mut status = StepStatus::started(name, "apply-object", Utc::now());
    status.phase = phase;
    status.reason = reason.map(String::from);
    status
  }

  #[test]
  fn test_transition_only_touches_time_on_change() {
    let start = Utc::now();
    let mut status = StepStatus::started("a", "apply-object", start);
    let later = start + chrono::Duration::seconds(5);

    assert!(!status.transition(StepPhase::Running, None, None, later));
    assert_eq!(status.last_execute_time, start);

    assert!(status.transition(StepPhase::Running, Some(reason::WAIT), None, later));
    assert_eq!(status.last_execute_time, later);
    assert_eq!(status.first_execute_time, start);
  }

  #[test]
  fn test_upsert_replaces_by_name() {
    let now = Utc::now();
    let mut wf = WorkflowStatus::new("app-v1", ExecutionMode::StepByStep, now);
    wf.upsert_step(StepStatus::started("a", "apply-object", now));
    let mut done = StepStatus::started("a", "apply-object", now);
    done.phase = StepPhase::Succeeded;
    wf.upsert_step(done);

    assert_eq!(wf.steps.len(), 1);
    assert_eq!(wf.step("a").unwrap().phase, StepPhase::Succeeded);
  }

  #[test]
  fn test_phase_derivation() {
    let mut wf = WorkflowStatus::new("app-v1", ExecutionMode::Dag, Utc::now());
    assert_eq!(wf.phase(), AppPhase::Running);
    wf.suspend = true;
    assert_eq!(wf.phase(), AppPhase::Suspending);
    wf.finished = true;
    assert_eq!(wf.phase(), AppPhase::WorkflowSucceeded);
    wf.terminated = true;
    assert_eq!(wf.phase(), AppPhase::WorkflowTerminated);
  }

  #[test]
  fn test_serialized_layout() {
    let now = Utc::now();
    let mut wf = WorkflowStatus::new("app-v1", ExecutionMode::StepByStep, now);
    let mut step = StepStatus::started("approve", "suspend", now);
    step.transition(StepPhase::Failed, Some(reason::TIMEOUT), None, now);
    wf.upsert_step(step);

    let value = serde_json::to_value(&wf).unwrap();
    assert_eq!(value["mode"], "StepByStep");
    assert_eq!(value["suspend"], false);
    assert_eq!(value["steps"][0]["type"], "suspend");
    assert_eq!(value["steps"][0]["phase"], "failed");
    assert_eq!(value["steps"][0]["reason"], "Timeout");
    assert!(value["steps"][0].get("firstExecuteTime").is_some());
    assert!(value["steps"][0].get("retries").is_none());
    assert_eq!(
      serde_json::to_value(AppPhase::WorkflowTerminated).unwrap(),
      json!("workflowTerminated")
    );
  }

  #[test]
  fn test_aggregate_missing_sub_steps_is_running() {
    let subs = vec![sub("a", StepPhase::Succeeded, None)];
    assert_eq!(aggregate_sub_steps(2, &subs).0, StepPhase::Running);
  }

  #[test]
  fn test_aggregate_running_wins_over_failed() {
    let subs = vec![
      sub("a", StepPhase::Failed, Some(reason::EXECUTE)),
      sub("b", StepPhase::Running, None),
    ];
    assert_eq!(aggregate_sub_steps(2, &subs).0, StepPhase::Running);
  }

  #[test]
  fn test_aggregate_failure_reason_priority() {
    let subs = vec![
      sub("a", StepPhase::Failed, Some(reason::TERMINATE)),
      sub("b", StepPhase::Failed, Some(reason::TIMEOUT)),
      sub("c", StepPhase::Succeeded, None),
    ];
    assert_eq!(
      aggregate_sub_steps(3, &subs),
      (StepPhase::Failed, Some(reason::TIMEOUT.to_string()))
    );
  }

  #[test]
  fn test_aggregate_all_skipped_and_succeeded() {
    let skipped = vec![sub("a", StepPhase::Skipped, Some(reason::SKIP))];
    assert_eq!(aggregate_sub_steps(1, &skipped).0, StepPhase::Skipped);

    let mixed = vec![
      sub("a", StepPhase::Skipped, Some(reason::SKIP)),
      sub("b", StepPhase::Succeeded, None),
    ];
    assert_eq!(aggregate_sub_steps(2, &mixed), (StepPhase::Succeeded, None));

    assert_eq!(aggregate_sub_steps(0, &[]), (StepPhase::Succeeded, None));
  }

  #[test]
  fn test_mark_terminated_fails_running_steps() {
    let now = Utc::now();
    let mut status = WorkflowStatus::new("demo-v1", ExecutionMode::StepByStep, now);
    status.suspend = true;
    status.upsert_step(sub("apply", StepPhase::Succeeded, None));
    let mut group = sub("group", StepPhase::Running, None);
    group.upsert_sub_step(sub("gate", StepPhase::Running, Some(reason::SUSPEND)));
    status.upsert_step(group);
    assert!(status.has_waiting_suspend());

    status.mark_terminated(now);

    assert!(status.terminated && status.finished && !status.suspend);
    assert_eq!(status.phase(), AppPhase::WorkflowTerminated);
    assert_eq!(status.step("apply").unwrap().phase, StepPhase::Succeeded);
    let gate = status.find_step_mut("gate").unwrap();
    assert_eq!(gate.phase, StepPhase::Failed);
    assert_eq!(gate.reason.as_deref(), Some(reason::TERMINATE));
    assert!(!status.has_waiting_suspend());
  }
}
