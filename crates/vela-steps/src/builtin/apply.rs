use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use vela_cluster::{ObjectKey, health_message, is_healthy, labels};

use super::parse_properties;
use crate::{StepContext, StepError, StepExecutor, StepInvocation, StepOutcome};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyComponentProperties {
  /// Defaults to the step name.
  #[serde(default)]
  component: Option<String>,
  #[serde(default)]
  cluster: String,
  /// Merged over the component's properties; component inputs land here.
  #[serde(default)]
  properties: Option<Value>,
}

/// Renders a component of the revision, applies every resulting object and
/// waits until all of them report healthy.
pub struct ApplyComponentStep;

#[async_trait]
impl StepExecutor for ApplyComponentStep {
  async fn execute(&self, step: &StepInvocation, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let props: ApplyComponentProperties = parse_properties(step)?;
    let name = props.component.as_deref().unwrap_or(&step.name);
    let component = ctx
      .revision
      .application
      .component(name)
      .ok_or_else(|| StepError::UnknownComponent {
        component: name.to_string(),
        revision: ctx.revision.name.clone(),
      })?;

    let objects = match &props.properties {
      Some(overrides) => {
        let mut component = component.clone();
        merge_into(&mut component.properties, overrides);
        ctx.renderer.render(&component, &ctx.render_context())?
      }
      None => ctx.renderer.render(component, &ctx.render_context())?,
    };
    let mut applied = Vec::with_capacity(objects.len());
    let mut pending = Vec::new();
    for object in objects {
      let stored = ctx.apply_tracked(&props.cluster, object, Some(name)).await?;
      let key = ObjectKey::from_object(&stored)?;
      if !is_healthy(&stored) {
        pending.push(format!("{}: {}", key, health_message(&stored)));
      }
      applied.push(key.to_string());
    }

    debug!(component = %name, objects = applied.len(), "component_applied");
    if pending.is_empty() {
      Ok(StepOutcome::Succeeded {
        output: json!({ "resources": applied }),
      })
    } else {
      Ok(StepOutcome::Wait {
        message: pending.join("; "),
      })
    }
  }
}

/// Deep-merge `overrides` into `base`; objects merge key by key, anything
/// else replaces.
fn merge_into(base: &mut Value, overrides: &Value) {
  match (base, overrides) {
    (Value::Object(base), Value::Object(overrides)) => {
      for (key, value) in overrides {
        merge_into(base.entry(key.clone()).or_insert(Value::Null), value);
      }
    }
    (base, value) => *base = value.clone(),
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyObjectProperties {
  value: Value,
  #[serde(default)]
  cluster: String,
}

/// Applies a literal object from the step properties.
pub struct ApplyObjectStep;

#[async_trait]
impl StepExecutor for ApplyObjectStep {
  async fn execute(&self, step: &StepInvocation, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let props: ApplyObjectProperties = parse_properties(step)?;
    if !props.value.is_object() {
      return Err(StepError::invalid(&step.name, "value must be an object"));
    }
    let stored = ctx.apply_tracked(&props.cluster, props.value, None).await?;
    Ok(StepOutcome::Succeeded { output: stored })
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConfigProperties {
  name: String,
  #[serde(default)]
  namespace: Option<String>,
  #[serde(default)]
  config: Map<String, Value>,
  #[serde(default)]
  cluster: String,
}

/// Writes a ConfigMap whose data is the given config; non-string values are
/// stored as JSON text.
pub struct CreateConfigStep;

#[async_trait]
impl StepExecutor for CreateConfigStep {
  async fn execute(&self, step: &StepInvocation, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let props: CreateConfigProperties = parse_properties(step)?;
    let data: Map<String, Value> = props
      .config
      .into_iter()
      .map(|(key, value)| {
        let text = match value {
          Value::String(s) => s,
          other => other.to_string(),
        };
        (key, Value::String(text))
      })
      .collect();

    let object = json!({
      "apiVersion": "v1",
      "kind": "ConfigMap",
      "metadata": {
        "name": props.name,
        "namespace": props.namespace.as_deref().unwrap_or(&ctx.namespace),
        "labels": { (labels::APP_NAME): ctx.app_name },
      },
      "data": data,
    });
    ctx.apply_tracked(&props.cluster, object, None).await?;
    Ok(StepOutcome::Succeeded {
      output: json!({ "name": props.name }),
    })
  }
}
