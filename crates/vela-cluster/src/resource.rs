use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::LOCAL_CLUSTER;
use crate::error::ClusterError;

fn default_cluster() -> String {
  LOCAL_CLUSTER.to_string()
}

const CLUSTER_SCOPED_KINDS: &[&str] = &[
  "APIService",
  "CSIDriver",
  "ClusterRole",
  "ClusterRoleBinding",
  "CustomResourceDefinition",
  "IngressClass",
  "MutatingWebhookConfiguration",
  "Namespace",
  "Node",
  "PersistentVolume",
  "PriorityClass",
  "RuntimeClass",
  "StorageClass",
  "ValidatingWebhookConfiguration",
  "VolumeAttachment",
];

/// Whether objects of this kind live outside any namespace.
pub fn is_cluster_scoped(kind: &str) -> bool {
  CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Set `metadata.namespace` when the object is namespaced and has none.
pub fn default_namespace(object: &mut serde_json::Value, namespace: &str) {
  let cluster_scoped = object
    .get("kind")
    .and_then(|k| k.as_str())
    .is_some_and(is_cluster_scoped);
  if cluster_scoped {
    return;
  }
  if let Some(metadata) = object.get_mut("metadata").and_then(|m| m.as_object_mut()) {
    let missing = metadata
      .get("namespace")
      .and_then(|ns| ns.as_str())
      .is_none_or(str::is_empty);
    if missing {
      metadata.insert(
        "namespace".to_string(),
        serde_json::Value::String(namespace.to_string()),
      );
    }
  }
}

/// Identifies an object within one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKey {
  pub api_version: String,
  pub kind: String,
  #[serde(default)]
  pub namespace: String,
  pub name: String,
}

impl ObjectKey {
  pub fn new(
    api_version: impl Into<String>,
    kind: impl Into<String>,
    namespace: impl Into<String>,
    name: impl Into<String>,
  ) -> Self {
    Self {
      api_version: api_version.into(),
      kind: kind.into(),
      namespace: namespace.into(),
      name: name.into(),
    }
  }

  /// Extract the key of a resource document.
  pub fn from_object(object: &serde_json::Value) -> Result<Self, ClusterError> {
    let field = |path: &[&str]| -> Option<String> {
      let mut current = object;
      for segment in path {
        current = current.get(segment)?;
      }
      current.as_str().map(String::from)
    };
    let missing = |what: &str| ClusterError::InvalidObject {
      message: format!("missing {}", what),
    };

    Ok(Self {
      api_version: field(&["apiVersion"]).ok_or_else(|| missing("apiVersion"))?,
      kind: field(&["kind"]).ok_or_else(|| missing("kind"))?,
      namespace: field(&["metadata", "namespace"]).unwrap_or_default(),
      name: field(&["metadata", "name"]).ok_or_else(|| missing("metadata.name"))?,
    })
  }

  /// API group (empty for the core group).
  pub fn group(&self) -> &str {
    match self.api_version.split_once('/') {
      Some((group, _)) => group,
      None => "",
    }
  }

  /// Version-independent key within a cluster.
  pub fn storage_key(&self) -> String {
    format!(
      "{}/{}/{}/{}",
      self.group(),
      self.kind,
      self.namespace,
      self.name
    )
  }
}

impl fmt::Display for ObjectKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.namespace.is_empty() {
      write!(f, "{}/{}", self.kind, self.name)
    } else {
      write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
  }
}

/// Reference to an object in a named cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
  #[serde(default = "default_cluster")]
  pub cluster: String,
  #[serde(flatten)]
  pub key: ObjectKey,
}

impl ResourceRef {
  pub fn new(cluster: impl Into<String>, key: ObjectKey) -> Self {
    let cluster = cluster.into();
    Self {
      cluster: if cluster.is_empty() {
        default_cluster()
      } else {
        cluster
      },
      key,
    }
  }

  /// Resource identity: `group/kind/cluster/namespace/name`.
  ///
  /// Two references with the same identity are the same live object.
  pub fn identity(&self) -> String {
    format!(
      "{}/{}/{}/{}/{}",
      self.key.group(),
      self.key.kind,
      self.cluster,
      self.key.namespace,
      self.key.name
    )
  }
}

impl fmt::Display for ResourceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.key, self.cluster)
  }
}
