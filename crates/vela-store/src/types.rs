use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vela_cluster::ResourceRef;
use vela_config::Application;
use vela_workflow::{AppPhase, WorkflowStatus};

/// An application as stored, with its status and CAS version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredApplication {
  pub application: Application,
  pub status: ApplicationStatus,
  /// Bumped on every write; compared by [`crate::Store::update_status`].
  pub version: u64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Status sub-resource of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
  pub status: AppPhase,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub latest_revision: Option<RevisionRef>,
  /// The revision that was current immediately before `latest_revision`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous_revision: Option<RevisionRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_succeeded_revision: Option<RevisionRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow: Option<WorkflowStatus>,
}

impl Default for ApplicationStatus {
  fn default() -> Self {
    Self {
      status: AppPhase::Running,
      latest_revision: None,
      previous_revision: None,
      last_succeeded_revision: None,
      workflow: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRef {
  pub name: String,
  pub revision: u64,
  pub hash: String,
}

/// Immutable snapshot of an application spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevision {
  pub app_name: String,
  pub revision: u64,
  /// `<app>-v<revision>`.
  pub name: String,
  pub hash: String,
  pub application: Application,
  pub created_at: DateTime<Utc>,
}

impl ApplicationRevision {
  pub fn revision_name(app_name: &str, revision: u64) -> String {
    format!("{}-v{}", app_name, revision)
  }

  pub fn to_ref(&self) -> RevisionRef {
    RevisionRef {
      name: self.name.clone(),
      revision: self.revision,
      hash: self.hash.clone(),
    }
  }
}

/// Ledger key: one tracker per (application, revision, cluster, namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerKey {
  pub app_name: String,
  pub revision: u64,
  pub cluster: String,
  pub namespace: String,
}

impl TrackerKey {
  /// The tracker a resource belongs to for a given application revision.
  pub fn for_resource(app_name: &str, revision: u64, resource: &ResourceRef) -> Self {
    Self {
      app_name: app_name.to_string(),
      revision,
      cluster: resource.cluster.clone(),
      namespace: resource.key.namespace.clone(),
    }
  }
}

/// A resource recorded in a tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
  pub resource: ResourceRef,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub component: Option<String>,
}

impl ManagedResource {
  pub fn identity(&self) -> String {
    self.resource.identity()
  }
}

/// Ledger of the resources a revision created or updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTracker {
  pub key: TrackerKey,
  pub keep_legacy_resource: bool,
  pub resources: Vec<ManagedResource>,
  pub created_at: DateTime<Utc>,
}

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
  /// Written; the record now has this version.
  Success { version: u64 },
  /// No such record.
  NotFound,
  /// Another writer got there first.
  VersionConflict { actual: u64 },
}
