use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::ClusterClient;
use crate::error::ClusterError;

/// Name of the cluster the control plane runs in.
pub const LOCAL_CLUSTER: &str = "local";

/// The active cluster clients, keyed by cluster name.
///
/// Passed explicitly to every step invocation and to the garbage collector;
/// there is no process-wide client.
#[derive(Clone, Default)]
pub struct ClusterContext {
  clients: BTreeMap<String, Arc<dyn ClusterClient>>,
}

impl ClusterContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// A context with a single `local` cluster.
  pub fn local(client: Arc<dyn ClusterClient>) -> Self {
    let mut ctx = Self::new();
    ctx.insert(LOCAL_CLUSTER, client);
    ctx
  }

  pub fn insert(&mut self, cluster: impl Into<String>, client: Arc<dyn ClusterClient>) {
    self.clients.insert(cluster.into(), client);
  }

  /// Client for a cluster; an empty name means `local`.
  pub fn client(&self, cluster: &str) -> Result<Arc<dyn ClusterClient>, ClusterError> {
    let cluster = if cluster.is_empty() {
      LOCAL_CLUSTER
    } else {
      cluster
    };
    self
      .clients
      .get(cluster)
      .cloned()
      .ok_or_else(|| ClusterError::UnknownCluster {
        cluster: cluster.to_string(),
      })
  }

  pub fn clusters(&self) -> impl Iterator<Item = &str> {
    self.clients.keys().map(|k| k.as_str())
  }
}
