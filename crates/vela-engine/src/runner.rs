//! Controller runner with channel-based triggering.
//!
//! The `ControllerRunner` owns an mpsc channel of application names and
//! reconciles each one it receives. Runs that are not finished yet are
//! re-queued after the requeue interval so that waits and suspend deadlines
//! are re-evaluated without holding anything open in between.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::Controller;
use crate::error::ControllerError;
use crate::events::{ExecutionNotifier, NoopNotifier};

/// A runner that reconciles applications in response to requests.
///
/// # Usage
///
/// ```ignore
/// let runner = ControllerRunner::new(controller);
///
/// // Get sender for external triggers (CLI, watchers, etc.)
/// let sender = runner.sender();
///
/// // Start the reconcile loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct ControllerRunner<N: ExecutionNotifier = NoopNotifier> {
  sender: mpsc::Sender<String>,
  receiver: mpsc::Receiver<String>,
  controller: Arc<Controller<N>>,
}

impl<N: ExecutionNotifier + 'static> ControllerRunner<N> {
  pub fn new(controller: Arc<Controller<N>>) -> Self {
    Self::with_buffer_size(controller, 100)
  }

  /// Create a new runner with a custom buffer size.
  pub fn with_buffer_size(controller: Arc<Controller<N>>, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      controller,
    }
  }

  /// Get a sender handle for requesting reconciliations.
  pub fn sender(&self) -> mpsc::Sender<String> {
    self.sender.clone()
  }

  /// Request a reconciliation of the named application.
  pub async fn reconcile(&self, name: impl Into<String>) -> Result<(), ControllerError> {
    let name = name.into();
    self
      .sender
      .send(name.clone())
      .await
      .map_err(|_| ControllerError::NotFound { app: name })
  }

  /// Queue every stored application.
  pub async fn enqueue_all(&self) -> Result<usize, ControllerError> {
    let apps = self.controller.store().list_applications().await?;
    let count = apps.len();
    for stored in apps {
      self.reconcile(stored.application.name).await?;
    }
    Ok(count)
  }

  pub fn controller(&self) -> &Arc<Controller<N>> {
    &self.controller
  }

  /// Start the reconcile loop.
  ///
  /// This blocks until the cancellation token is triggered or the channel closes.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), ControllerError> {
    info!("starting controller runner");

    loop {
      tokio::select! {
          _ = cancel.cancelled() => {
              info!("controller runner cancelled");
              break;
          }
          request = self.receiver.recv() => {
              let Some(name) = request else {
                  info!("controller runner channel closed");
                  break;
              };
              match self.controller.reconcile(&name).await {
                  Ok(outcome) if outcome.done => {
                      info!(app = %name, phase = ?outcome.phase, "reconcile_done");
                  }
                  Ok(outcome) => {
                      debug!(app = %name, phase = ?outcome.phase, "reconcile_pending");
                      self.requeue(name, cancel.child_token());
                  }
                  Err(ControllerError::NotFound { .. }) => {
                      debug!(app = %name, "reconcile_skipped_missing");
                  }
                  Err(e) if e.is_fatal() => {
                      error!(app = %name, error = %e, "reconcile_rejected");
                  }
                  Err(e) => {
                      error!(app = %name, error = %e, "reconcile_failed");
                      self.requeue(name, cancel.child_token());
                  }
              }
          }
      }
    }

    Ok(())
  }

  fn requeue(&self, name: String, cancel: CancellationToken) {
    let sender = self.sender.clone();
    let delay = self.controller.engine().settings().requeue_interval();
    tokio::spawn(async move {
      tokio::select! {
          _ = cancel.cancelled() => {}
          _ = tokio::time::sleep(delay) => {
              let _ = sender.send(name).await;
          }
      }
    });
  }
}
