use serde_json::json;
use vela_config::{ExecutionMode, StepDef, WorkflowDef, WorkflowMode};
use vela_engine::{DefaultPlanner, PlanContext, PlanError, WorkflowPlanner};
use vela_steps::step_types;
use vela_store::ApplicationRevision;

use crate::step::ROLLOUT_BATCH;
use crate::{BatchStep, RolloutError, RolloutPlan, RolloutPolicy};

/// Name of a component's workload in a given revision.
pub fn workload_name(component: &str, revision: u64) -> String {
  format!("{}-v{}", component, revision)
}

/// Plans a batch-wise rollout for applications with a `rollout` policy and
/// falls back to [`DefaultPlanner`] for everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolloutPlanner;

impl WorkflowPlanner for RolloutPlanner {
  fn plan(&self, ctx: &PlanContext<'_>) -> Result<WorkflowDef, PlanError> {
    let app = &ctx.revision.application;
    if app.workflow.is_some() {
      return DefaultPlanner.plan(ctx);
    }
    let to_plan_error = |err: RolloutError| PlanError {
      revision: ctx.revision.name.clone(),
      message: err.to_string(),
    };
    let Some(policy) = RolloutPolicy::from_application(app).map_err(to_plan_error)? else {
      return DefaultPlanner.plan(ctx);
    };

    let (source, batches) = plan_batches(&policy, ctx.revision, ctx.previous).map_err(to_plan_error)?;
    Ok(rollout_workflow(&policy, ctx.revision, source, &batches))
  }
}

/// Resolve the source revision and the batches of a rollout towards `target`.
///
/// Without a usable source the whole target size goes out in one batch.
pub(crate) fn plan_batches<'a>(
  policy: &RolloutPolicy,
  target: &ApplicationRevision,
  previous: Option<&'a ApplicationRevision>,
) -> Result<(Option<&'a ApplicationRevision>, Vec<BatchStep>), RolloutError> {
  if target.application.component(&policy.component).is_none() {
    return Err(RolloutError::MissingComponent {
      component: policy.component.clone(),
      revision: target.name.clone(),
    });
  }
  let total = policy.total_replicas(&target.application);
  let source = previous.filter(|prev| {
    prev.revision != target.revision && prev.application.component(&policy.component).is_some()
  });

  let batches = match source {
    Some(_) => policy.plan.batches(total)?,
    None => RolloutPlan::default().batches(total)?,
  };
  Ok((source, batches))
}

/// The rollout workflow: other components first, then the batches in order
/// with a suspend step behind every batch that asks for a pause.
pub fn rollout_workflow(
  policy: &RolloutPolicy,
  target: &ApplicationRevision,
  source: Option<&ApplicationRevision>,
  batches: &[BatchStep],
) -> WorkflowDef {
  let mut steps: Vec<StepDef> = target
    .application
    .components
    .iter()
    .filter(|c| c.name != policy.component)
    .map(|component| {
      let mut step = StepDef::new(&component.name, step_types::APPLY_COMPONENT);
      step.properties = json!({ "component": component.name });
      step
    })
    .collect();

  let total = batches.last().map_or(0, |b| b.replicas);
  let target_name = workload_name(&policy.component, target.revision);
  let source_name = source.map(|s| workload_name(&policy.component, s.revision));

  for batch in batches {
    let mut step = StepDef::new(format!("rollout-batch-{}", batch.index), ROLLOUT_BATCH);
    step.properties = json!({
      "component": policy.component,
      "target": target_name,
      "source": source_name,
      "replicas": batch.replicas,
      "total": total,
      "trafficWeight": batch.traffic_weight,
      "batch": batch.index,
    });
    steps.push(step);

    if let Some(pause) = &batch.pause {
      let mut gate = StepDef::new(format!("rollout-pause-{}", batch.index), step_types::SUSPEND);
      gate.properties = match &pause.duration {
        Some(duration) => json!({ "duration": duration }),
        None => serde_json::Value::Null,
      };
      gate.timeout = pause.timeout.clone();
      steps.push(gate);
    }
  }

  WorkflowDef {
    mode: Some(WorkflowMode {
      steps: ExecutionMode::StepByStep,
      sub_steps: ExecutionMode::Dag,
    }),
    steps,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use vela_config::Application;

  fn revision(revision: u64, app: serde_json::Value) -> ApplicationRevision {
    let application: Application = serde_json::from_value(app).unwrap();
    ApplicationRevision {
      app_name: application.name.clone(),
      revision,
      name: ApplicationRevision::revision_name(&application.name, revision),
      hash: format!("h{}", revision),
      application,
      created_at: Utc::now(),
    }
  }

  fn canary_app(image: &str) -> serde_json::Value {
    json!({
      "name": "shop",
      "components": [
        { "name": "web", "type": "webservice", "properties": { "image": image, "replicas": 4 } },
        { "name": "cache", "type": "worker", "properties": { "image": "redis" } }
      ],
      "policies": [{
        "name": "canary",
        "type": "rollout",
        "properties": {
          "component": "web",
          "plan": { "rolloutBatches": [
            { "replicas": 1, "pause": { "duration": "10m", "timeout": "1h" } },
            { "replicas": 3 }
          ] }
        }
      }]
    })
  }

  fn step_names(plan: &WorkflowDef) -> Vec<&str> {
    plan.steps.iter().map(|s| s.name.as_str()).collect()
  }

  #[test]
  fn test_rollout_between_revisions() {
    let v1 = revision(1, canary_app("web:1"));
    let v2 = revision(2, canary_app("web:2"));
    let plan = RolloutPlanner
      .plan(&PlanContext {
        revision: &v2,
        previous: Some(&v1),
      })
      .unwrap();

    assert_eq!(plan.mode().steps, ExecutionMode::StepByStep);
    assert_eq!(
      step_names(&plan),
      vec!["cache", "rollout-batch-1", "rollout-pause-1", "rollout-batch-2"]
    );
    let first = &plan.steps[1].properties;
    assert_eq!(first["target"], "web-v2");
    assert_eq!(first["source"], "web-v1");
    assert_eq!(first["replicas"], 1);
    assert_eq!(first["trafficWeight"], 25);
    assert_eq!(first["total"], 4);

    let gate = &plan.steps[2];
    assert_eq!(gate.step_type, step_types::SUSPEND);
    assert_eq!(gate.properties["duration"], "10m");
    assert_eq!(gate.timeout.as_deref(), Some("1h"));
  }

  #[test]
  fn test_first_revision_is_single_batch() {
    let v1 = revision(1, canary_app("web:1"));
    let plan = RolloutPlanner
      .plan(&PlanContext {
        revision: &v1,
        previous: None,
      })
      .unwrap();

    assert_eq!(step_names(&plan), vec!["cache", "rollout-batch-1"]);
    let batch = &plan.steps[1].properties;
    assert_eq!(batch["replicas"], 4);
    assert_eq!(batch["trafficWeight"], 100);
    assert!(batch["source"].is_null());
  }

  #[test]
  fn test_rollback_reverses_source_and_target() {
    let v1 = revision(1, canary_app("web:1"));
    let v2 = revision(2, canary_app("web:2"));
    let plan = RolloutPlanner
      .plan(&PlanContext {
        revision: &v1,
        previous: Some(&v2),
      })
      .unwrap();

    assert_eq!(plan.steps[1].properties["target"], "web-v1");
    assert_eq!(plan.steps[1].properties["source"], "web-v2");
  }

  #[test]
  fn test_without_policy_uses_default_planner() {
    let v1 = revision(
      1,
      json!({ "name": "shop", "components": [{ "name": "web", "type": "worker", "properties": { "image": "x" } }] }),
    );
    let plan = RolloutPlanner
      .plan(&PlanContext {
        revision: &v1,
        previous: None,
      })
      .unwrap();
    assert_eq!(plan.mode().steps, ExecutionMode::Dag);
    assert_eq!(step_names(&plan), vec!["web"]);
  }

  #[test]
  fn test_missing_rollout_component() {
    let mut app = canary_app("web:1");
    app["policies"][0]["properties"]["component"] = json!("api");
    let v1 = revision(1, app);
    let err = RolloutPlanner
      .plan(&PlanContext {
        revision: &v1,
        previous: None,
      })
      .unwrap_err();
    assert!(err.message.contains("api"));
  }
}
