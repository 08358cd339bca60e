//! Vela Steps
//!
//! The step registry maps a step `type` to the executor that runs it. The
//! engine only ever talks to [`StepExecutor`]; new step types are added by
//! registering an executor, never by touching the engine.
//!
//! Executors receive everything they may touch through [`StepContext`]: the
//! revision being deployed, the cluster clients, the renderer and the
//! resource keeper. There is no global client.

mod builtin;
mod context;
mod error;
mod executor;
mod registry;

pub use builtin::{
  ApplyComponentStep, ApplyObjectStep, ConditionalWaitStep, CreateConfigStep, ReadObjectStep,
  StepGroupMarker, SuspendStep, step_types,
};
pub use context::StepContext;
pub use error::StepError;
pub use executor::{StepExecutor, StepInvocation, StepOutcome};
pub use registry::{StandardRegistry, StepRegistry};
