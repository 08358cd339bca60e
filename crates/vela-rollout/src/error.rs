use thiserror::Error;
use vela_engine::OperationError;

#[derive(Debug, Error)]
pub enum RolloutError {
  #[error("invalid rollout plan: {message}")]
  InvalidPlan { message: String },

  #[error("invalid rollout policy for {app}: {message}")]
  InvalidPolicy { app: String, message: String },

  #[error("rollout component '{component}' not found in {revision}")]
  MissingComponent { component: String, revision: String },

  #[error("application {app} has no rollout policy")]
  NoRolloutPolicy { app: String },

  #[error(transparent)]
  Operation(#[from] OperationError),

  #[error("store error: {0}")]
  Store(#[from] vela_store::Error),
}

impl RolloutError {
  pub(crate) fn plan(message: impl Into<String>) -> Self {
    RolloutError::InvalidPlan {
      message: message.into(),
    }
  }
}
