use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::client::{ClusterClient, merge_applied};
use crate::error::ClusterError;
use crate::resource::ObjectKey;

/// Filesystem-backed cluster.
///
/// Objects are stored as JSON documents in a directory structure:
/// ```text
/// {root}/
/// └── default/                  (namespace, `_cluster` for cluster-scoped)
///     └── Deployment.apps/      (kind, then group; `core` for the core group)
///         └── web.json
/// ```
///
/// Nothing runs workloads here, so with simulated readiness every applied
/// object that declares `spec.replicas` is written back with
/// `status.readyReplicas` equal to it.
pub struct FsCluster {
  root: PathBuf,
  simulate_readiness: bool,
}

impl FsCluster {
  /// Create a filesystem cluster at the given root path.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      simulate_readiness: false,
    }
  }

  pub fn with_simulated_readiness(mut self, enabled: bool) -> Self {
    self.simulate_readiness = enabled;
    self
  }

  /// Get the root directory of the cluster.
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn kind_dir(&self, api_version: &str, kind: &str, namespace: &str) -> PathBuf {
    let probe = ObjectKey::new(api_version, kind, namespace, "");
    let group = if probe.group().is_empty() {
      "core"
    } else {
      probe.group()
    };
    let namespace = if namespace.is_empty() {
      "_cluster"
    } else {
      namespace
    };
    self
      .root
      .join(namespace)
      .join(format!("{}.{}", kind, group))
  }

  fn object_path(&self, key: &ObjectKey) -> PathBuf {
    self
      .kind_dir(&key.api_version, &key.kind, &key.namespace)
      .join(format!("{}.json", key.name))
  }

  async fn read_object(path: &Path) -> Result<Option<serde_json::Value>, ClusterError> {
    match fs::read_to_string(path).await {
      Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  async fn list_dir(dir: &Path) -> Result<Vec<serde_json::Value>, ClusterError> {
    let mut entries = match fs::read_dir(dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut objects = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "json") {
        if let Some(object) = Self::read_object(&path).await? {
          objects.push(object);
        }
      }
    }
    Ok(objects)
  }
}

#[async_trait]
impl ClusterClient for FsCluster {
  async fn apply(&self, object: serde_json::Value) -> Result<serde_json::Value, ClusterError> {
    let key = ObjectKey::from_object(&object)?;
    let path = self.object_path(&key);
    let existing = Self::read_object(&path).await?;
    let mut merged = merge_applied(existing.as_ref(), object);
    if self.simulate_readiness {
      if let Some(replicas) = merged.pointer("/spec/replicas").cloned() {
        merged["status"]["readyReplicas"] = replicas;
      }
    }

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }
    fs::write(&path, serde_json::to_vec_pretty(&merged)?).await?;
    debug!(object = %key, created = existing.is_none(), "object_applied");
    Ok(merged)
  }

  async fn get(&self, key: &ObjectKey) -> Result<Option<serde_json::Value>, ClusterError> {
    Self::read_object(&self.object_path(key)).await
  }

  async fn delete(&self, key: &ObjectKey) -> Result<bool, ClusterError> {
    match fs::remove_file(self.object_path(key)).await {
      Ok(()) => {
        debug!(object = %key, "object_deleted");
        Ok(true)
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  async fn list(
    &self,
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
  ) -> Result<Vec<serde_json::Value>, ClusterError> {
    let mut objects = match namespace {
      Some(ns) => Self::list_dir(&self.kind_dir(api_version, kind, ns)).await?,
      None => {
        let mut all = Vec::new();
        let mut namespaces = match fs::read_dir(&self.root).await {
          Ok(entries) => entries,
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
          Err(e) => return Err(e.into()),
        };
        while let Some(entry) = namespaces.next_entry().await? {
          let ns = entry.file_name().to_string_lossy().to_string();
          let ns = if ns == "_cluster" { String::new() } else { ns };
          all.extend(Self::list_dir(&self.kind_dir(api_version, kind, &ns)).await?);
        }
        all
      }
    };
    objects.sort_by_key(|o| ObjectKey::from_object(o).map(|k| k.storage_key()).ok());
    Ok(objects)
  }
}
