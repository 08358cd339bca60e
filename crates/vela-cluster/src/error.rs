use thiserror::Error;

/// Errors returned by cluster clients.
#[derive(Debug, Error)]
pub enum ClusterError {
  /// A concurrent writer changed the object first.
  #[error("conflict on {key}: {message}")]
  Conflict { key: String, message: String },

  /// The cluster could not be reached or failed the request.
  #[error("cluster unavailable: {message}")]
  Unavailable { message: String },

  /// The object is malformed (missing apiVersion, kind or metadata.name).
  #[error("invalid object: {message}")]
  InvalidObject { message: String },

  /// No client is registered for the cluster.
  #[error("unknown cluster: {cluster}")]
  UnknownCluster { cluster: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl ClusterError {
  /// Whether retrying on a later pass may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::Conflict { .. } | Self::Unavailable { .. } | Self::Io(_)
    )
  }
}
