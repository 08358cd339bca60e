use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("store error: {0}")]
  Store(#[from] vela_store::Error),

  /// The application's `garbage-collect` policy could not be decoded.
  #[error("invalid gc policy for {app}: {message}")]
  InvalidPolicy { app: String, message: String },
}
