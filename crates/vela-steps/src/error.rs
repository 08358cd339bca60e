use thiserror::Error;
use vela_cluster::{ClusterError, RenderError};
use vela_tracker::GcError;

/// Errors raised by step executors.
///
/// Transient errors keep the step running and are retried on the next pass;
/// everything else fails the step.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("invalid properties for step '{step}': {message}")]
  InvalidProperties { step: String, message: String },

  #[error("component '{component}' not found in revision {revision}")]
  UnknownComponent { component: String, revision: String },

  #[error("expression error in step '{step}': {message}")]
  Expression { step: String, message: String },

  #[error("{message}")]
  Transient { message: String },

  #[error(transparent)]
  Cluster(#[from] ClusterError),

  #[error(transparent)]
  Render(#[from] RenderError),

  #[error("failed to track resource: {0}")]
  Track(#[from] GcError),
}

impl StepError {
  pub fn is_transient(&self) -> bool {
    match self {
      StepError::Transient { .. } | StepError::Track(_) => true,
      StepError::Cluster(err) => err.is_transient(),
      _ => false,
    }
  }

  pub(crate) fn invalid(step: &str, message: impl Into<String>) -> Self {
    StepError::InvalidProperties {
      step: step.to_string(),
      message: message.into(),
    }
  }
}
