use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{DurationError, parse_duration};

/// Step type whose sub-steps are scheduled as a nested graph.
pub const STEP_GROUP_TYPE: &str = "step-group";

/// A workflow attached to an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mode: Option<WorkflowMode>,
  #[serde(default)]
  pub steps: Vec<StepDef>,
}

impl WorkflowDef {
  /// The execution modes in effect (StepByStep for steps, DAG for sub-steps by default).
  pub fn mode(&self) -> WorkflowMode {
    self.mode.clone().unwrap_or_default()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMode {
  #[serde(default = "ExecutionMode::step_by_step")]
  pub steps: ExecutionMode,
  #[serde(default = "ExecutionMode::dag")]
  pub sub_steps: ExecutionMode,
}

impl Default for WorkflowMode {
  fn default() -> Self {
    Self {
      steps: ExecutionMode::StepByStep,
      sub_steps: ExecutionMode::Dag,
    }
  }
}

/// Execution topology of one scope of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
  StepByStep,
  #[serde(rename = "DAG")]
  Dag,
}

impl ExecutionMode {
  fn step_by_step() -> Self {
    Self::StepByStep
  }

  fn dag() -> Self {
    Self::Dag
  }
}

impl fmt::Display for ExecutionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::StepByStep => f.write_str("StepByStep"),
      Self::Dag => f.write_str("DAG"),
    }
  }
}

/// A single workflow step definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
  pub name: String,
  #[serde(rename = "type")]
  pub step_type: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<String>,
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub properties: serde_json::Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sub_steps: Vec<StepDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inputs: Vec<InputItem>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<OutputItem>,
}

impl StepDef {
  /// Create a step with only a name and a type.
  pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      step_type: step_type.into(),
      depends_on: Vec::new(),
      condition: None,
      timeout: None,
      properties: serde_json::Value::Null,
      sub_steps: Vec::new(),
      inputs: Vec::new(),
      outputs: Vec::new(),
    }
  }

  pub fn is_group(&self) -> bool {
    self.step_type == STEP_GROUP_TYPE
  }

  /// Parsed `timeout`, if declared.
  pub fn timeout_duration(&self) -> Result<Option<Duration>, DurationError> {
    self.timeout.as_deref().map(parse_duration).transpose()
  }
}

/// Binds a workflow context variable into the step's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputItem {
  /// Name of the context variable.
  pub from: String,
  /// Dotted path inside `properties` to write to.
  pub parameter_key: String,
}

/// Exports a value from the step's output into the workflow context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
  pub name: String,
  /// Expression evaluated against `{ output }`.
  pub value_from: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_deserialize_step() {
    let step: StepDef = serde_json::from_value(json!({
      "name": "approve",
      "type": "suspend",
      "dependsOn": ["deploy"],
      "if": "status.deploy.succeeded",
      "timeout": "5s"
    }))
    .unwrap();

    assert_eq!(step.step_type, "suspend");
    assert_eq!(step.depends_on, vec!["deploy"]);
    assert_eq!(step.condition.as_deref(), Some("status.deploy.succeeded"));
    assert_eq!(step.timeout_duration().unwrap(), Some(Duration::from_secs(5)));
    assert!(!step.is_group());
  }

  #[test]
  fn test_mode_defaults() {
    let def: WorkflowDef = serde_json::from_value(json!({ "steps": [] })).unwrap();
    assert_eq!(def.mode().steps, ExecutionMode::StepByStep);
    assert_eq!(def.mode().sub_steps, ExecutionMode::Dag);

    let def: WorkflowDef =
      serde_json::from_value(json!({ "mode": { "steps": "DAG" }, "steps": [] })).unwrap();
    assert_eq!(def.mode().steps, ExecutionMode::Dag);
    assert_eq!(def.mode().sub_steps, ExecutionMode::Dag);
  }

  #[test]
  fn test_mode_display() {
    assert_eq!(ExecutionMode::StepByStep.to_string(), "StepByStep");
    assert_eq!(ExecutionMode::Dag.to_string(), "DAG");
  }
}
