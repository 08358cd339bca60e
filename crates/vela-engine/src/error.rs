use thiserror::Error;
use vela_workflow::WorkflowError;

/// Errors that abort a whole engine pass.
///
/// Step-level failures never surface here; they are recorded on the step.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid workflow: {0}")]
  Validation(#[from] WorkflowError),

  #[error("no executor registered for step type '{step_type}'")]
  MissingExecutor { step_type: String },
}

/// A workflow could not be planned for a revision.
#[derive(Debug, Error)]
#[error("failed to plan workflow for {revision}: {message}")]
pub struct PlanError {
  pub revision: String,
  pub message: String,
}

#[derive(Debug, Error)]
pub enum ControllerError {
  #[error("application {app} not found")]
  NotFound { app: String },

  #[error("invalid gc policy for {app}: {message}")]
  InvalidPolicy { app: String, message: String },

  #[error("status of {app} kept changing; gave up after {attempts} attempts")]
  ConflictRetriesExhausted { app: String, attempts: u32 },

  #[error("could not remove every resource of {app}; {failed} deletes failed, {deferred} waiting on dependents")]
  FinalizeIncomplete {
    app: String,
    failed: usize,
    deferred: usize,
  },

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("store error: {0}")]
  Store(#[from] vela_store::Error),

  #[error("garbage collection failed: {0}")]
  Gc(#[from] vela_tracker::GcError),
}

impl ControllerError {
  /// Errors that another pass over the same application cannot fix.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      ControllerError::InvalidPolicy { .. }
        | ControllerError::Plan(_)
        | ControllerError::Engine(EngineError::Validation(_) | EngineError::MissingExecutor { .. })
    )
  }
}

/// Errors returned by [`crate::WorkflowOperator`].
#[derive(Debug, Error)]
pub enum OperationError {
  #[error("application {app} not found")]
  NotFound { app: String },

  #[error("application {app} has no workflow")]
  NoWorkflow { app: String },

  #[error("workflow of {app} is terminated")]
  Terminated { app: String },

  #[error("workflow of {app} is finished")]
  Finished { app: String },

  #[error("workflow of {app} is still running; suspend or terminate it first")]
  StillRunning { app: String },

  #[error("application {app} has no succeeded revision to roll back to")]
  NoSucceededRevision { app: String },

  #[error("step '{step}' not found in the workflow of {app}")]
  StepNotFound { app: String, step: String },

  #[error("step '{step}' of {app} is not a waiting suspend step")]
  StepNotSuspended { app: String, step: String },

  #[error("status of {app} kept changing; gave up after {attempts} attempts")]
  ConflictRetriesExhausted { app: String, attempts: u32 },

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error("store error: {0}")]
  Store(#[from] vela_store::Error),
}
