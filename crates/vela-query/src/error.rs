use thiserror::Error;
use vela_cluster::ClusterError;

#[derive(Debug, Error)]
pub enum QueryError {
  #[error("unknown view '{view}'")]
  UnknownView { view: String },

  #[error("invalid parameters for view '{view}': {message}")]
  InvalidParams { view: String, message: String },

  #[error("application {app} not found")]
  NotFound { app: String },

  #[error("store error: {0}")]
  Store(#[from] vela_store::Error),

  #[error(transparent)]
  Cluster(#[from] ClusterError),
}
