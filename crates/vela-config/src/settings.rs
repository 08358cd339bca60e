use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine and controller settings.
///
/// Loaded from `config.json` in the data directory; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
  /// Transient step errors tolerated before a step fails with `FailedAfterRetries`.
  pub max_step_errors: u32,
  /// Reconcile attempts when the stored status changed underneath us.
  pub conflict_retries: u32,
  /// Delay before an unfinished workflow is reconciled again.
  pub requeue_interval_ms: u64,
  /// Unreferenced revisions retained beyond the current and previous ones.
  pub revision_history_limit: usize,
  pub default_namespace: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      max_step_errors: 10,
      conflict_retries: 5,
      requeue_interval_ms: 5_000,
      revision_history_limit: 10,
      default_namespace: "default".to_string(),
    }
  }
}

impl Settings {
  pub fn requeue_interval(&self) -> Duration {
    Duration::from_millis(self.requeue_interval_ms)
  }
}
