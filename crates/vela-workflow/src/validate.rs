use std::collections::{HashMap, HashSet};

use vela_config::{STEP_GROUP_TYPE, StepDef, WorkflowDef};

use crate::error::WorkflowError;

/// Validate a workflow definition.
///
/// This checks, per scope:
/// 1. Step names are non-empty and unique
/// 2. `dependsOn` only names siblings and contains no cycles
/// 3. Only `step-group` steps declare sub-steps, and groups do not nest
/// 4. Timeouts parse and every step type is known
pub fn validate(
  def: &WorkflowDef,
  is_known_type: impl Fn(&str) -> bool,
) -> Result<(), WorkflowError> {
  validate_scope(&def.steps, false, &is_known_type)
}

fn validate_scope(
  steps: &[StepDef],
  nested: bool,
  is_known_type: &impl Fn(&str) -> bool,
) -> Result<(), WorkflowError> {
  let mut names = HashSet::new();
  for step in steps {
    if step.name.trim().is_empty() {
      return Err(WorkflowError::EmptyStepName);
    }
    if !names.insert(step.name.as_str()) {
      return Err(WorkflowError::DuplicateStep {
        name: step.name.clone(),
      });
    }
  }

  for step in steps {
    for dep in &step.depends_on {
      if dep == &step.name || !names.contains(dep.as_str()) {
        return Err(WorkflowError::UnknownDependency {
          step: step.name.clone(),
          depends_on: dep.clone(),
        });
      }
    }

    if !step.sub_steps.is_empty() && !step.is_group() {
      return Err(WorkflowError::SubStepsNotAllowed {
        step: step.name.clone(),
        step_type: step.step_type.clone(),
      });
    }
    if nested && step.is_group() {
      return Err(WorkflowError::NestedGroup {
        step: step.name.clone(),
      });
    }

    step
      .timeout_duration()
      .map_err(|e| WorkflowError::InvalidTimeout {
        step: step.name.clone(),
        message: e.to_string(),
      })?;

    if step.step_type != STEP_GROUP_TYPE && !is_known_type(&step.step_type) {
      return Err(WorkflowError::UnknownStepType {
        step: step.name.clone(),
        step_type: step.step_type.clone(),
      });
    }

    if step.is_group() {
      validate_scope(&step.sub_steps, true, is_known_type)?;
    }
  }

  detect_cycle(steps)
}

/// Check for cycles in `dependsOn` using DFS.
fn detect_cycle(steps: &[StepDef]) -> Result<(), WorkflowError> {
  let adjacency: HashMap<&str, Vec<&str>> = steps
    .iter()
    .map(|s| {
      (
        s.name.as_str(),
        s.depends_on.iter().map(|d| d.as_str()).collect(),
      )
    })
    .collect();

  // DFS with coloring: 0 = white (unvisited), 1 = gray (in progress), 2 = black (done)
  let mut color: HashMap<&str, u8> = steps.iter().map(|s| (s.name.as_str(), 0u8)).collect();

  fn dfs<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    color: &mut HashMap<&'a str, u8>,
    path: &mut Vec<&'a str>,
  ) -> bool {
    color.insert(node, 1);
    path.push(node);

    if let Some(neighbors) = adjacency.get(node) {
      for &neighbor in neighbors {
        match color.get(neighbor) {
          Some(1) => {
            path.push(neighbor);
            return true;
          }
          Some(0) => {
            if dfs(neighbor, adjacency, color, path) {
              return true;
            }
          }
          _ => {}
        }
      }
    }

    path.pop();
    color.insert(node, 2);
    false
  }

  for step in steps {
    if color.get(step.name.as_str()) == Some(&0) {
      let mut path = Vec::new();
      if dfs(step.name.as_str(), &adjacency, &mut color, &mut path) {
        return Err(WorkflowError::CycleDetected {
          steps: path.into_iter().map(String::from).collect(),
        });
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn step(name: &str, step_type: &str, deps: &[&str]) -> StepDef {
    let mut step = StepDef::new(name, step_type);
    step.depends_on = deps.iter().map(|d| d.to_string()).collect();
    step
  }

  fn workflow(steps: Vec<StepDef>) -> WorkflowDef {
    WorkflowDef { mode: None, steps }
  }

  fn known(t: &str) -> bool {
    matches!(t, "apply-object" | "suspend")
  }

  #[test]
  fn test_valid_workflow() {
    let mut group = step("group", "step-group", &["a"]);
    group.sub_steps = vec![step("x", "apply-object", &[]), step("y", "suspend", &["x"])];
    let def = workflow(vec![step("a", "apply-object", &[]), group]);

    assert_eq!(validate(&def, known), Ok(()));
  }

  #[test]
  fn test_duplicate_name() {
    let def = workflow(vec![
      step("a", "apply-object", &[]),
      step("a", "suspend", &[]),
    ]);
    assert_eq!(
      validate(&def, known),
      Err(WorkflowError::DuplicateStep {
        name: "a".to_string()
      })
    );
  }

  #[test]
  fn test_same_name_in_different_scopes_is_allowed() {
    let mut group = step("a", "step-group", &[]);
    group.sub_steps = vec![step("a", "apply-object", &[])];
    assert_eq!(validate(&workflow(vec![group]), known), Ok(()));
  }

  #[test]
  fn test_unknown_dependency() {
    let def = workflow(vec![step("a", "apply-object", &["ghost"])]);
    assert!(matches!(
      validate(&def, known),
      Err(WorkflowError::UnknownDependency { .. })
    ));
  }

  #[test]
  fn test_cycle_detected() {
    let def = workflow(vec![
      step("a", "apply-object", &["c"]),
      step("b", "apply-object", &["a"]),
      step("c", "apply-object", &["b"]),
    ]);
    match validate(&def, known) {
      Err(WorkflowError::CycleDetected { steps }) => {
        assert!(steps.len() >= 3);
      }
      other => panic!("expected cycle error, got {:?}", other),
    }
  }

  #[test]
  fn test_unknown_type() {
    let def = workflow(vec![step("a", "launch-rockets", &[])]);
    assert_eq!(
      validate(&def, known),
      Err(WorkflowError::UnknownStepType {
        step: "a".to_string(),
        step_type: "launch-rockets".to_string()
      })
    );
  }

  #[test]
  fn test_sub_steps_on_non_group() {
    let mut bad = step("a", "apply-object", &[]);
    bad.sub_steps = vec![step("x", "apply-object", &[])];
    assert!(matches!(
      validate(&workflow(vec![bad]), known),
      Err(WorkflowError::SubStepsNotAllowed { .. })
    ));
  }

  #[test]
  fn test_nested_group() {
    let mut inner = step("inner", "step-group", &[]);
    inner.sub_steps = vec![step("x", "apply-object", &[])];
    let mut outer = step("outer", "step-group", &[]);
    outer.sub_steps = vec![inner];
    assert_eq!(
      validate(&workflow(vec![outer]), known),
      Err(WorkflowError::NestedGroup {
        step: "inner".to_string()
      })
    );
  }

  #[test]
  fn test_invalid_timeout() {
    let mut bad = step("a", "apply-object", &[]);
    bad.timeout = Some("soon".to_string());
    assert!(matches!(
      validate(&workflow(vec![bad]), known),
      Err(WorkflowError::InvalidTimeout { .. })
    ));
  }
}
