use async_trait::async_trait;
use serde::Deserialize;
use vela_config::parse_duration;

use super::parse_properties;
use crate::{StepContext, StepError, StepExecutor, StepInvocation, StepOutcome};

#[derive(Debug, Default, Deserialize)]
struct SuspendProperties {
  #[serde(default)]
  duration: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

/// Pauses the workflow until it is resumed or `duration` has elapsed since
/// the step first ran.
pub struct SuspendStep;

#[async_trait]
impl StepExecutor for SuspendStep {
  async fn execute(&self, step: &StepInvocation, _ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let props: SuspendProperties = parse_properties(step)?;
    let duration = props
      .duration
      .as_deref()
      .map(parse_duration)
      .transpose()
      .map_err(|err| StepError::invalid(&step.name, err.to_string()))?;

    if step.first_run {
      return Ok(StepOutcome::Suspend {
        message: props.message,
      });
    }
    if !step.suspended {
      return Ok(StepOutcome::succeeded());
    }
    if let Some(duration) = duration {
      let elapsed = (step.now - step.first_execute_time).to_std().unwrap_or_default();
      if elapsed >= duration {
        return Ok(StepOutcome::succeeded());
      }
    }
    Ok(StepOutcome::Suspend {
      message: props.message,
    })
  }
}

/// Registered so `step-group` resolves as a known type; the engine runs
/// groups itself and never invokes this executor for them.
pub struct StepGroupMarker;

#[async_trait]
impl StepExecutor for StepGroupMarker {
  async fn execute(&self, _step: &StepInvocation, _ctx: &StepContext) -> Result<StepOutcome, StepError> {
    Ok(StepOutcome::succeeded())
  }
}
