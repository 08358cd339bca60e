//! Vela Store
//!
//! This crate provides the storage trait and implementations for the three
//! kinds of durable records the control plane owns:
//!
//! - Applications, with a versioned status sub-resource written by CAS
//! - Application revisions, immutable and numbered per application
//! - Resource trackers, the per-revision ledgers the garbage collector reads
//!
//! [`MemoryStore`] backs tests and one-shot commands; [`SqliteStore`] persists
//! to a SQLite database. [`RevisionStore`] layers spec hashing and revision
//! numbering on top of either.

mod memory;
mod revision;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use revision::{RevisionStore, spec_hash};
pub use sqlite::SqliteStore;
pub use types::{
  ApplicationRevision, ApplicationStatus, CasResult, ManagedResource, ResourceTracker,
  RevisionRef, StoredApplication, TrackerKey,
};

use async_trait::async_trait;
use vela_config::Application;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same key already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The backing store is in an unusable state.
  #[error("storage error: {0}")]
  Storage(String),
}

/// Storage trait for applications, revisions and resource trackers.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a new application with a default status at version 1.
  async fn create_application(&self, application: &Application) -> Result<StoredApplication, Error>;

  /// Get an application by name.
  async fn get_application(&self, name: &str) -> Result<StoredApplication, Error>;

  /// List all applications ordered by name.
  async fn list_applications(&self) -> Result<Vec<StoredApplication>, Error>;

  /// Replace the spec of an application if its version still matches.
  async fn update_application(
    &self,
    application: &Application,
    expected_version: u64,
  ) -> Result<CasResult, Error>;

  /// Replace the status of an application if its version still matches.
  async fn update_status(
    &self,
    name: &str,
    status: &ApplicationStatus,
    expected_version: u64,
  ) -> Result<CasResult, Error>;

  /// Delete an application. Returns false if it did not exist.
  async fn delete_application(&self, name: &str) -> Result<bool, Error>;

  /// Persist a new revision. Fails with [`Error::AlreadyExists`] if the
  /// revision number is taken.
  async fn create_revision(&self, revision: &ApplicationRevision) -> Result<(), Error>;

  /// Get a revision by application name and number.
  async fn get_revision(&self, app_name: &str, revision: u64) -> Result<ApplicationRevision, Error>;

  /// List revisions of an application in ascending order.
  async fn list_revisions(&self, app_name: &str) -> Result<Vec<ApplicationRevision>, Error>;

  /// Delete a revision. Returns false if it did not exist.
  async fn delete_revision(&self, app_name: &str, revision: u64) -> Result<bool, Error>;

  /// Record a resource in the tracker for `key`, creating the tracker if
  /// needed. Returns true if the entry was newly added.
  async fn track_resource(
    &self,
    key: &TrackerKey,
    keep_legacy_resource: bool,
    resource: &ManagedResource,
  ) -> Result<bool, Error>;

  /// Remove one entry from a tracker. Returns false if it was not present.
  async fn remove_tracked_resource(&self, key: &TrackerKey, identity: &str) -> Result<bool, Error>;

  /// List the trackers of an application ordered by revision.
  async fn list_trackers(&self, app_name: &str) -> Result<Vec<ResourceTracker>, Error>;

  /// Delete a tracker and all of its entries.
  async fn delete_tracker(&self, key: &TrackerKey) -> Result<bool, Error>;
}
