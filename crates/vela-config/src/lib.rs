//! Vela Config
//!
//! This crate contains the serializable definition types for Vela. These
//! types represent what a user declares (an application with its components,
//! traits, policies and an optional workflow) before any revision is taken or
//! any step is executed.
//!
//! Configuration can be loaded from:
//! - JSON files (via the CLI with `vela app deploy app.json`)
//! - Database storage (as JSON blobs inside revisions)
//!
//! It also carries the engine [`Settings`] and the Go-style duration parser
//! used by step timeouts and suspend durations.

mod application;
mod duration;
mod policy;
mod settings;
mod workflow;

pub use application::{Application, ComponentDef, PolicyDef, TraitDef};
pub use duration::{DurationError, parse_duration};
pub use policy::{
  GcOrder, GcPolicy, GcRule, GcSelector, GcStrategy, POLICY_GARBAGE_COLLECT, POLICY_ROLLOUT,
};
pub use settings::Settings;
pub use workflow::{
  ExecutionMode, InputItem, OutputItem, STEP_GROUP_TYPE, StepDef, WorkflowDef, WorkflowMode,
};
