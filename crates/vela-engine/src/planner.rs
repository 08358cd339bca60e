use serde_json::json;
use vela_config::{Application, ExecutionMode, InputItem, StepDef, WorkflowDef, WorkflowMode};
use vela_steps::step_types;
use vela_store::ApplicationRevision;

use crate::error::PlanError;

/// Inputs for planning the workflow of one revision.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
  pub revision: &'a ApplicationRevision,
  /// The revision that was current before this one, if any.
  pub previous: Option<&'a ApplicationRevision>,
}

/// Produces the workflow to run for a revision.
///
/// Planning must be deterministic: the controller re-plans on every pass and
/// matches the result against the persisted status by step name.
pub trait WorkflowPlanner: Send + Sync {
  fn plan(&self, ctx: &PlanContext<'_>) -> Result<WorkflowDef, PlanError>;
}

/// Uses the declared workflow, or one apply step per component.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPlanner;

impl WorkflowPlanner for DefaultPlanner {
  fn plan(&self, ctx: &PlanContext<'_>) -> Result<WorkflowDef, PlanError> {
    let app = &ctx.revision.application;
    Ok(match &app.workflow {
      Some(workflow) => workflow.clone(),
      None => default_workflow(app),
    })
  }
}

/// The workflow used when an application declares none: every component is
/// applied in its own DAG step, ordered by the components' `dependsOn` and by
/// which components produce the outputs their inputs read.
pub fn default_workflow(app: &Application) -> WorkflowDef {
  let steps = app
    .components
    .iter()
    .map(|component| {
      let mut step = StepDef::new(&component.name, step_types::APPLY_COMPONENT);
      step.properties = json!({ "component": component.name });
      step.depends_on = component.depends_on.clone();
      for producer in &app.components {
        let feeds = producer
          .outputs
          .iter()
          .any(|o| component.inputs.iter().any(|i| i.from == o.name));
        if feeds && producer.name != component.name && !step.depends_on.contains(&producer.name) {
          step.depends_on.push(producer.name.clone());
        }
      }
      step.inputs = component
        .inputs
        .iter()
        .map(|input| InputItem {
          from: input.from.clone(),
          parameter_key: format!("properties.{}", input.parameter_key),
        })
        .collect();
      step.outputs = component.outputs.clone();
      step
    })
    .collect();

  WorkflowDef {
    mode: Some(WorkflowMode {
      steps: ExecutionMode::Dag,
      sub_steps: ExecutionMode::Dag,
    }),
    steps,
  }
}
