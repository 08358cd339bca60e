use thiserror::Error;

/// Validation errors. These are fatal to a run and never retried.
#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
  #[error("step name must not be empty")]
  EmptyStepName,

  #[error("duplicate step name: {name}")]
  DuplicateStep { name: String },

  #[error("step '{step}' depends on unknown step '{depends_on}'")]
  UnknownDependency { step: String, depends_on: String },

  #[error("cycle detected in dependsOn among: {steps:?}")]
  CycleDetected { steps: Vec<String> },

  #[error("step '{step}' declares subSteps but is of type '{step_type}'")]
  SubStepsNotAllowed { step: String, step_type: String },

  #[error("step group '{step}' cannot be nested inside another step group")]
  NestedGroup { step: String },

  #[error("step '{step}' has an invalid timeout: {message}")]
  InvalidTimeout { step: String, message: String },

  #[error("step '{step}' has unknown type '{step_type}'")]
  UnknownStepType { step: String, step_type: String },
}
