//! Execution events and notifiers for observability.
//!
//! Events are emitted as steps change phase so that consumers can stream
//! progress, record history, etc. They are derived from status transitions,
//! so a pass that changes nothing emits nothing.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A step ran for the first time.
  StepStarted { app: String, step: String },

  StepSucceeded { app: String, step: String },

  StepFailed {
    app: String,
    step: String,
    reason: String,
    message: Option<String>,
  },

  /// A step's `if` evaluated to false.
  StepSkipped { app: String, step: String },

  /// A step is waiting for a condition or a resume.
  StepWaiting {
    app: String,
    step: String,
    message: Option<String>,
  },

  WorkflowSuspended { app: String, revision: String },

  WorkflowSucceeded { app: String, revision: String },

  WorkflowTerminated { app: String, revision: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a pass; volume is a handful
  // of events per step transition.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // The receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
