use async_trait::async_trait;
use minijinja::{Environment, Value as TemplateValue, context};
use serde::Deserialize;
use serde_json::json;
use vela_cluster::{health_message, is_healthy};

use super::{ObjectTarget, parse_properties};
use crate::{StepContext, StepError, StepExecutor, StepInvocation, StepOutcome};

/// Reads an object; waits while it does not exist.
pub struct ReadObjectStep;

#[async_trait]
impl StepExecutor for ReadObjectStep {
  async fn execute(&self, step: &StepInvocation, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let target: ObjectTarget = parse_properties(step)?;
    let key = target.key(&ctx.namespace);
    let client = ctx.clusters.client(&target.cluster)?;
    match client.get(&key).await? {
      Some(object) => Ok(StepOutcome::Succeeded {
        output: json!({ "value": object }),
      }),
      None => Ok(StepOutcome::Wait {
        message: format!("{} not found", key),
      }),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionalWaitProperties {
  #[serde(flatten)]
  target: ObjectTarget,
  /// Expression over `object`; defaults to the object's health.
  #[serde(default)]
  condition: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

/// Waits until a condition over a freshly read object holds.
pub struct ConditionalWaitStep;

#[async_trait]
impl StepExecutor for ConditionalWaitStep {
  async fn execute(&self, step: &StepInvocation, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let props: ConditionalWaitProperties = parse_properties(step)?;
    let key = props.target.key(&ctx.namespace);
    let client = ctx.clusters.client(&props.target.cluster)?;
    let Some(object) = client.get(&key).await? else {
      return Ok(StepOutcome::Wait {
        message: format!("{} not found", key),
      });
    };

    let ready = match &props.condition {
      Some(condition) => evaluate(&step.name, condition, &object)?,
      None => is_healthy(&object),
    };
    if ready {
      return Ok(StepOutcome::Succeeded {
        output: json!({ "value": object }),
      });
    }
    Ok(StepOutcome::Wait {
      message: props.message.unwrap_or_else(|| match props.condition {
        Some(condition) => format!("waiting for {}: {}", key, condition),
        None => health_message(&object),
      }),
    })
  }
}

fn evaluate(step: &str, condition: &str, object: &serde_json::Value) -> Result<bool, StepError> {
  let expression_error = |err: minijinja::Error| StepError::Expression {
    step: step.to_string(),
    message: err.to_string(),
  };
  let env = Environment::new();
  let expr = env.compile_expression(condition).map_err(expression_error)?;
  let value = expr
    .eval(context! { object => TemplateValue::from_serialize(object) })
    .map_err(expression_error)?;
  Ok(value.is_true())
}
