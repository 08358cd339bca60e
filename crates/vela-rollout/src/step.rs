use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use vela_cluster::{ObjectKey, health_message, is_healthy, labels};
use vela_steps::{StepContext, StepError, StepExecutor, StepInvocation, StepOutcome};

/// Step type of one rollout batch.
pub const ROLLOUT_BATCH: &str = "rollout-batch";

const TRAFFIC_SPLIT_API: &str = "split.smi-spec.io/v1alpha2";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchProperties {
  component: String,
  /// Workload name of the revision being rolled out.
  target: String,
  /// Workload name of the revision being replaced.
  #[serde(default)]
  source: Option<String>,
  replicas: u32,
  total: u32,
  traffic_weight: u32,
  #[serde(default)]
  batch: usize,
  #[serde(default)]
  cluster: String,
}

/// Moves one batch of replicas and traffic from the source workload to the
/// target workload, then waits for the target to become healthy.
pub struct RolloutBatchStep;

#[async_trait]
impl StepExecutor for RolloutBatchStep {
  async fn execute(&self, step: &StepInvocation, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let properties = if step.properties.is_null() {
      json!({})
    } else {
      step.properties.clone()
    };
    let props: BatchProperties =
      serde_json::from_value(properties).map_err(|err| invalid(&step.name, err.to_string()))?;

    let component = ctx
      .revision
      .application
      .component(&props.component)
      .ok_or_else(|| StepError::UnknownComponent {
        component: props.component.clone(),
        revision: ctx.revision.name.clone(),
      })?;

    let mut objects = ctx.renderer.render(component, &ctx.render_context())?.into_iter();
    let Some(mut workload) = objects.next() else {
      return Err(invalid(&step.name, "component renders no workload"));
    };
    retarget(&mut workload, &props.target, props.replicas, &ctx.revision.name);

    let stored = ctx
      .apply_tracked(&props.cluster, workload, Some(&props.component))
      .await?;
    let target_key = ObjectKey::from_object(&stored)?;
    for object in objects {
      ctx
        .apply_tracked(&props.cluster, object, Some(&props.component))
        .await?;
    }

    // The source workload belongs to the previous revision's tracker and is
    // only scaled here.
    if let Some(source) = &props.source {
      let client = ctx.clusters.client(&props.cluster)?;
      let source_key = ObjectKey {
        name: source.clone(),
        ..target_key.clone()
      };
      if let Some(mut existing) = client.get(&source_key).await? {
        existing["spec"]["replicas"] = json!(props.total.saturating_sub(props.replicas));
        client.apply(existing).await?;
      }
    }

    let split = traffic_split(ctx, &props, &target_key.namespace);
    ctx
      .apply_tracked(&props.cluster, split, Some(&props.component))
      .await?;

    debug!(
      component = %props.component,
      batch = props.batch,
      replicas = props.replicas,
      traffic_weight = props.traffic_weight,
      "rollout_batch_applied"
    );

    if !is_healthy(&stored) {
      return Ok(StepOutcome::Wait {
        message: format!("{}: {}", target_key, health_message(&stored)),
      });
    }
    Ok(StepOutcome::Succeeded {
      output: json!({
        "batch": props.batch,
        "replicas": props.replicas,
        "trafficWeight": props.traffic_weight,
      }),
    })
  }
}

fn invalid(step: &str, message: impl Into<String>) -> StepError {
  StepError::InvalidProperties {
    step: step.to_string(),
    message: message.into(),
  }
}

/// Rename the rendered workload to its per-revision name and pin its pods to
/// the revision so source and target select disjoint pods.
fn retarget(workload: &mut Value, name: &str, replicas: u32, revision: &str) {
  workload["metadata"]["name"] = json!(name);
  if workload.get("spec").is_some_and(Value::is_object) {
    workload["spec"]["replicas"] = json!(replicas);
  }
  for pointer in ["/spec/selector/matchLabels", "/spec/template/metadata/labels"] {
    if let Some(map) = workload.pointer_mut(pointer).and_then(Value::as_object_mut) {
      map.insert(labels::APP_REVISION.to_string(), json!(revision));
    }
  }
}

fn traffic_split(ctx: &StepContext, props: &BatchProperties, namespace: &str) -> Value {
  let mut backends = vec![json!({ "service": props.target, "weight": props.traffic_weight })];
  if let Some(source) = &props.source {
    backends.push(json!({ "service": source, "weight": 100 - props.traffic_weight.min(100) }));
  }
  json!({
    "apiVersion": TRAFFIC_SPLIT_API,
    "kind": "TrafficSplit",
    "metadata": {
      "name": props.component,
      "namespace": namespace,
      "labels": {
        (labels::APP_NAME): ctx.app_name,
        (labels::COMPONENT): props.component,
      },
    },
    "spec": {
      "service": props.component,
      "backends": backends,
    },
  })
}
