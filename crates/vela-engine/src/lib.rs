//! Vela Workflow Engine
//!
//! This crate drives applications from declared spec to deployed resources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ControllerRunner                        │
//! │  - owns mpsc channel of application names                   │
//! │  - start(cancel) reconciles until cancelled                 │
//! │  - re-queues unfinished runs after the requeue interval     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Controller                           │
//! │  - revision → plan → engine pass → CAS status write         │
//! │  - retries from fresh state on version conflicts            │
//! │  - sweeps old revisions once a workflow succeeds            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                         │
//! │  - run(workflow, status, ctx) → one reconciliation pass     │
//! │  - StepByStep / DAG scheduling, step groups                 │
//! │  - timeouts, suspend/resume, retries of transient errors    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`WorkflowOperator`] is the operator surface: status, resume, suspend,
//! terminate, restart and rollback, all written through compare-and-swap.

mod clock;
mod controller;
mod engine;
mod error;
mod events;
mod expr;
mod operator;
mod planner;
mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{Controller, ReconcileOutcome};
pub use engine::{RunOutcome, WorkflowEngine};
pub use error::{ControllerError, EngineError, OperationError, PlanError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use operator::{WorkflowOperator, WorkflowView};
pub use planner::{DefaultPlanner, PlanContext, WorkflowPlanner, default_workflow};
pub use runner::ControllerRunner;
