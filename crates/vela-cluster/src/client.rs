use async_trait::async_trait;

use crate::error::ClusterError;
use crate::resource::ObjectKey;

/// Client for one cluster's object API.
///
/// Every write is create-or-patch so that any step may be replayed safely.
#[async_trait]
pub trait ClusterClient: Send + Sync {
  /// Create the object or patch the existing one. Returns the stored object.
  ///
  /// An existing object keeps its `status` when the applied document has none.
  async fn apply(&self, object: serde_json::Value) -> Result<serde_json::Value, ClusterError>;

  /// Read an object, `None` if absent.
  async fn get(&self, key: &ObjectKey) -> Result<Option<serde_json::Value>, ClusterError>;

  /// Delete an object. Returns whether it existed.
  async fn delete(&self, key: &ObjectKey) -> Result<bool, ClusterError>;

  /// List objects of a kind, optionally restricted to a namespace.
  async fn list(
    &self,
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
  ) -> Result<Vec<serde_json::Value>, ClusterError>;
}

/// Merge an applied document onto the stored one.
pub(crate) fn merge_applied(
  existing: Option<&serde_json::Value>,
  mut applied: serde_json::Value,
) -> serde_json::Value {
  if let (Some(existing), Some(obj)) = (existing, applied.as_object_mut()) {
    if !obj.contains_key("status") {
      if let Some(status) = existing.get("status") {
        obj.insert("status".to_string(), status.clone());
      }
    }
  }
  applied
}
