use std::sync::Arc;

use tracing::debug;
use vela_cluster::ResourceRef;
use vela_store::{ManagedResource, Store, TrackerKey};

use crate::GcError;

/// Records applied resources in the tracker of their revision.
#[derive(Clone)]
pub struct ResourceKeeper {
  store: Arc<dyn Store>,
}

impl ResourceKeeper {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  /// Record `resource` for `(app, revision)`. Re-recording is a no-op.
  ///
  /// `keep_legacy_resource` only takes effect when this call creates the tracker.
  pub async fn track(
    &self,
    app_name: &str,
    revision: u64,
    resource: &ResourceRef,
    component: Option<&str>,
    keep_legacy_resource: bool,
  ) -> Result<bool, GcError> {
    let key = TrackerKey::for_resource(app_name, revision, resource);
    let entry = ManagedResource {
      resource: resource.clone(),
      component: component.map(String::from),
    };
    let added = self
      .store
      .track_resource(&key, keep_legacy_resource, &entry)
      .await?;
    if added {
      debug!(
        app = %app_name,
        revision = revision,
        resource = %resource,
        "resource_tracked"
      );
    }
    Ok(added)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use vela_cluster::ObjectKey;
  use vela_store::MemoryStore;

  #[tokio::test]
  async fn test_track_is_idempotent_per_identity() {
    let store = Arc::new(MemoryStore::new());
    let keeper = ResourceKeeper::new(store.clone());
    let v1 = ResourceRef::new("", ObjectKey::new("apps/v1", "Deployment", "default", "web"));
    let v1beta = ResourceRef::new(
      "local",
      ObjectKey::new("apps/v1beta1", "Deployment", "default", "web"),
    );

    assert!(keeper.track("demo", 1, &v1, Some("web"), false).await.unwrap());
    // Same identity under another API version.
    assert!(!keeper.track("demo", 1, &v1beta, Some("web"), false).await.unwrap());

    let trackers = store.list_trackers("demo").await.unwrap();
    assert_eq!(trackers.len(), 1);
    assert_eq!(trackers[0].key.cluster, "local");
    assert_eq!(trackers[0].resources.len(), 1);
  }
}
