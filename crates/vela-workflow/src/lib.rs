//! Vela Workflow
//!
//! This crate provides the validated form of a workflow and the status record
//! that the engine persists after every pass.
//!
//! - [`Graph`] derives the dependency graph of one scope of steps, either from
//!   declaration order (StepByStep) or from `dependsOn` (DAG).
//! - [`validate`] rejects malformed step graphs before anything executes.
//! - [`WorkflowStatus`] / [`StepStatus`] are the sole source of truth for resume.

mod error;
mod graph;
mod status;
mod validate;

pub use error::WorkflowError;
pub use graph::Graph;
pub use status::{AppPhase, StepPhase, StepStatus, WorkflowStatus, aggregate_sub_steps, reason};
pub use validate::validate;
