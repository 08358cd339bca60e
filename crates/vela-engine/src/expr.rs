//! Input binding, output export and `if` conditions.
//!
//! Expressions are minijinja expressions; values cross the boundary through
//! serde so that step properties and outputs stay plain JSON.

use std::collections::BTreeMap;

use minijinja::{Environment, Value, context};
use serde_json::Map;
use vela_config::{InputItem, OutputItem};
use vela_workflow::{StepPhase, StepStatus, reason};

/// `if` value that runs a step once its dependencies are terminal, whatever they ended as.
pub const ALWAYS: &str = "always";

/// Copy workflow context variables into step properties.
pub fn bind_inputs(
  properties: &serde_json::Value,
  inputs: &[InputItem],
  context: &BTreeMap<String, serde_json::Value>,
) -> Result<serde_json::Value, String> {
  let mut bound = match properties {
    serde_json::Value::Null => serde_json::Value::Object(Map::new()),
    other => other.clone(),
  };

  for input in inputs {
    let value = context
      .get(&input.from)
      .ok_or_else(|| format!("input '{}' not found in workflow context", input.from))?;
    set_path(&mut bound, &input.parameter_key, value.clone())?;
  }
  Ok(bound)
}

fn set_path(target: &mut serde_json::Value, path: &str, value: serde_json::Value) -> Result<(), String> {
  let segments: Vec<&str> = path.split('.').collect();
  let Some((last, parents)) = segments.split_last() else {
    return Err("empty parameter key".to_string());
  };

  let mut current = target;
  for segment in parents {
    let object = current
      .as_object_mut()
      .ok_or_else(|| format!("cannot set '{}': parent is not an object", path))?;
    current = object
      .entry(segment.to_string())
      .or_insert_with(|| serde_json::Value::Object(Map::new()));
  }
  current
    .as_object_mut()
    .ok_or_else(|| format!("cannot set '{}': parent is not an object", path))?
    .insert(last.to_string(), value);
  Ok(())
}

/// Evaluate every `outputs[].valueFrom` against the step output.
pub fn export_outputs(
  outputs: &[OutputItem],
  output: &serde_json::Value,
) -> Result<Vec<(String, serde_json::Value)>, String> {
  let env = Environment::new();
  outputs
    .iter()
    .map(|item| {
      let expr = env
        .compile_expression(&item.value_from)
        .map_err(|e| format!("output '{}': {}", item.name, e))?;
      let value = expr
        .eval(context! { output => Value::from_serialize(output) })
        .map_err(|e| format!("output '{}': {}", item.name, e))?;
      if value.is_undefined() {
        return Err(format!("output '{}': '{}' is undefined", item.name, item.value_from));
      }
      let json = serde_json::to_value(&value).map_err(|e| format!("output '{}': {}", item.name, e))?;
      Ok((item.name.clone(), json))
    })
    .collect()
}

/// Evaluate a step's `if` against sibling statuses and the workflow context.
pub fn evaluate_condition(
  condition: &str,
  siblings: &[StepStatus],
  context: &BTreeMap<String, serde_json::Value>,
) -> Result<bool, String> {
  let status: BTreeMap<&str, serde_json::Value> = siblings
    .iter()
    .map(|s| {
      (
        s.name.as_str(),
        serde_json::json!({
          "phase": s.phase,
          "succeeded": s.phase == StepPhase::Succeeded,
          "failed": s.phase == StepPhase::Failed,
          "skipped": s.phase == StepPhase::Skipped,
          "timeout": s.reason.as_deref() == Some(reason::TIMEOUT),
          "reason": s.reason,
          "message": s.message,
        }),
      )
    })
    .collect();

  let env = Environment::new();
  let expr = env
    .compile_expression(condition)
    .map_err(|e| format!("invalid if '{}': {}", condition, e))?;
  let result = expr
    .eval(context! {
      status => Value::from_serialize(&status),
      context => Value::from_serialize(context),
    })
    .map_err(|e| format!("invalid if '{}': {}", condition, e))?;
  Ok(result.is_true())
}
