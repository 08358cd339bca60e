use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::client::{ClusterClient, merge_applied};
use crate::error::ClusterError;
use crate::resource::ObjectKey;

fn poison_err<T>(_: PoisonError<T>) -> ClusterError {
  ClusterError::Unavailable {
    message: "lock poisoned".to_string(),
  }
}

/// In-memory cluster.
///
/// Suitable for tests and single-process use. Readiness is not simulated:
/// use [`InMemoryCluster::set_status`] to report object status.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
  objects: RwLock<HashMap<String, serde_json::Value>>,
  fail_deletes: AtomicBool,
  unavailable: AtomicBool,
}

impl InMemoryCluster {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every delete fail with an `Unavailable` error.
  pub fn set_fail_deletes(&self, fail: bool) {
    self.fail_deletes.store(fail, Ordering::SeqCst);
  }

  /// Make every request fail with an `Unavailable` error.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  /// Replace the `status` of a stored object. Returns whether the object exists.
  pub fn set_status(&self, key: &ObjectKey, status: serde_json::Value) -> bool {
    let mut objects = self
      .objects
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    match objects
      .get_mut(&key.storage_key())
      .and_then(|o| o.as_object_mut())
    {
      Some(object) => {
        object.insert("status".to_string(), status);
        true
      }
      None => false,
    }
  }

  pub fn contains(&self, key: &ObjectKey) -> bool {
    self
      .objects
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(&key.storage_key())
  }

  pub fn len(&self) -> usize {
    self
      .objects
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn check_available(&self) -> Result<(), ClusterError> {
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(ClusterError::Unavailable {
        message: "cluster is unreachable".to_string(),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
  async fn apply(&self, object: serde_json::Value) -> Result<serde_json::Value, ClusterError> {
    self.check_available()?;
    let key = ObjectKey::from_object(&object)?;
    let mut objects = self.objects.write().map_err(poison_err)?;
    let merged = merge_applied(objects.get(&key.storage_key()), object);
    objects.insert(key.storage_key(), merged.clone());
    Ok(merged)
  }

  async fn get(&self, key: &ObjectKey) -> Result<Option<serde_json::Value>, ClusterError> {
    self.check_available()?;
    let objects = self.objects.read().map_err(poison_err)?;
    Ok(objects.get(&key.storage_key()).cloned())
  }

  async fn delete(&self, key: &ObjectKey) -> Result<bool, ClusterError> {
    self.check_available()?;
    if self.fail_deletes.load(Ordering::SeqCst) {
      return Err(ClusterError::Unavailable {
        message: format!("delete of {} rejected", key),
      });
    }
    let mut objects = self.objects.write().map_err(poison_err)?;
    Ok(objects.remove(&key.storage_key()).is_some())
  }

  async fn list(
    &self,
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
  ) -> Result<Vec<serde_json::Value>, ClusterError> {
    self.check_available()?;
    let probe = ObjectKey::new(api_version, kind, "", "");
    let objects = self.objects.read().map_err(poison_err)?;
    let mut found: Vec<serde_json::Value> = objects
      .values()
      .filter(|object| {
        ObjectKey::from_object(object).is_ok_and(|key| {
          key.group() == probe.group()
            && key.kind == kind
            && namespace.is_none_or(|ns| key.namespace == ns)
        })
      })
      .cloned()
      .collect();
    found.sort_by_key(|o| ObjectKey::from_object(o).map(|k| k.storage_key()).ok());
    Ok(found)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn deployment(name: &str, replicas: u64) -> serde_json::Value {
    json!({
      "apiVersion": "apps/v1",
      "kind": "Deployment",
      "metadata": { "name": name, "namespace": "default" },
      "spec": { "replicas": replicas }
    })
  }

  #[tokio::test]
  async fn test_apply_get_delete() {
    let cluster = InMemoryCluster::new();
    let key = ObjectKey::new("apps/v1", "Deployment", "default", "web");

    assert_eq!(cluster.get(&key).await.unwrap(), None);
    cluster.apply(deployment("web", 1)).await.unwrap();
    assert_eq!(cluster.get(&key).await.unwrap().unwrap()["spec"]["replicas"], 1);

    assert!(cluster.delete(&key).await.unwrap());
    assert!(!cluster.delete(&key).await.unwrap());
  }

  #[tokio::test]
  async fn test_apply_is_idempotent_and_keeps_status() {
    let cluster = InMemoryCluster::new();
    let key = ObjectKey::new("apps/v1", "Deployment", "default", "web");

    cluster.apply(deployment("web", 1)).await.unwrap();
    assert!(cluster.set_status(&key, json!({ "readyReplicas": 1 })));
    let stored = cluster.apply(deployment("web", 3)).await.unwrap();

    assert_eq!(cluster.len(), 1);
    assert_eq!(stored["spec"]["replicas"], 3);
    assert_eq!(stored["status"]["readyReplicas"], 1);
  }

  #[tokio::test]
  async fn test_failure_injection() {
    let cluster = InMemoryCluster::new();
    let key = ObjectKey::new("apps/v1", "Deployment", "default", "web");
    cluster.apply(deployment("web", 1)).await.unwrap();

    cluster.set_fail_deletes(true);
    let err = cluster.delete(&key).await.unwrap_err();
    assert!(err.is_transient());
    assert!(cluster.contains(&key));

    cluster.set_unavailable(true);
    assert!(cluster.get(&key).await.is_err());
  }

  #[tokio::test]
  async fn test_list_filters_kind_and_namespace() {
    let cluster = InMemoryCluster::new();
    cluster.apply(deployment("a", 1)).await.unwrap();
    cluster.apply(deployment("b", 1)).await.unwrap();
    cluster
      .apply(json!({ "apiVersion": "v1", "kind": "Service", "metadata": { "name": "a", "namespace": "default" } }))
      .await
      .unwrap();

    let deployments = cluster.list("apps/v1", "Deployment", Some("default")).await.unwrap();
    assert_eq!(deployments.len(), 2);
    assert_eq!(deployments[0]["metadata"]["name"], "a");

    let other = cluster.list("apps/v1", "Deployment", Some("prod")).await.unwrap();
    assert!(other.is_empty());
  }
}
