//! Vela Rollout
//!
//! Progressive delivery between two revisions, expressed as ordinary
//! workflow steps:
//!
//! - [`RolloutPlan::batches`] turns a plan into cumulative
//!   `(replicas, trafficWeight)` batches ending at `(total, 100)`.
//! - [`RolloutPlanner`] emits one `rollout-batch` step per batch and a
//!   `suspend` step after every batch that asks for a pause.
//! - [`RolloutBatchStep`] moves replicas and traffic for one batch.
//! - [`RolloutController`] pauses, resumes and rolls back through the
//!   workflow operator, so pause points are just suspend steps.

mod controller;
mod error;
mod plan;
mod planner;
mod step;

pub use controller::{BatchStatus, RolloutController, RolloutStatus};
pub use error::RolloutError;
pub use plan::{BatchPause, BatchSize, BatchStep, RolloutBatch, RolloutPlan, RolloutPolicy};
pub use planner::{RolloutPlanner, rollout_workflow, workload_name};
pub use step::{ROLLOUT_BATCH, RolloutBatchStep};

use std::sync::Arc;

use vela_steps::StandardRegistry;

/// Add the `rollout-batch` step type to a registry.
pub fn register(registry: &mut StandardRegistry) {
  registry.register(ROLLOUT_BATCH, Arc::new(RolloutBatchStep));
}
