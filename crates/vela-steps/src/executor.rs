use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{StepContext, StepError};

/// One execution of a step, as seen by its executor.
#[derive(Debug, Clone)]
pub struct StepInvocation {
  pub name: String,
  pub step_type: String,
  /// Step properties with inputs already bound.
  pub properties: serde_json::Value,
  pub first_execute_time: DateTime<Utc>,
  /// Time of the current reconciliation pass.
  pub now: DateTime<Utc>,
  /// True when the step has no status yet.
  pub first_run: bool,
  /// Whether the workflow is currently suspended.
  pub suspended: bool,
}

/// What a step asks the engine to do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
  /// Done; `output` is available to `outputs[].valueFrom`.
  Succeeded { output: serde_json::Value },
  /// Not yet; run again next pass.
  Wait { message: String },
  /// Pause the workflow until resumed.
  Suspend { message: Option<String> },
  Failed { message: String },
  /// Fail the step and stop the whole workflow.
  Terminate { message: String },
}

impl StepOutcome {
  pub fn succeeded() -> Self {
    StepOutcome::Succeeded {
      output: serde_json::Value::Null,
    }
  }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
  /// Execute one pass of the step. Must be safe to replay.
  async fn execute(
    &self,
    step: &StepInvocation,
    ctx: &StepContext,
  ) -> Result<StepOutcome, StepError>;
}
