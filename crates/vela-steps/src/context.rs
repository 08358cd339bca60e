use std::sync::Arc;

use vela_cluster::{
  ClusterContext, ObjectKey, RenderContext, Renderer, ResourceRef, default_namespace,
};
use vela_store::ApplicationRevision;
use vela_tracker::ResourceKeeper;

use crate::StepError;

/// Everything a step may use, passed explicitly to every invocation.
#[derive(Clone)]
pub struct StepContext {
  pub app_name: String,
  pub namespace: String,
  /// The revision the workflow deploys.
  pub revision: Arc<ApplicationRevision>,
  /// The revision that was current before it, if any.
  pub previous_revision: Option<Arc<ApplicationRevision>>,
  pub clusters: ClusterContext,
  pub renderer: Arc<dyn Renderer>,
  pub keeper: ResourceKeeper,
  /// `keepLegacyResource` of the GC policy in effect for this revision.
  pub keep_legacy_resource: bool,
}

impl StepContext {
  pub fn render_context(&self) -> RenderContext {
    RenderContext {
      app_name: self.app_name.clone(),
      namespace: self.namespace.clone(),
      revision_name: self.revision.name.clone(),
    }
  }
}

impl StepContext {
  /// Apply an object to a cluster and record it in this revision's tracker.
  ///
  /// Namespaced objects without a namespace land in the application's namespace.
  pub async fn apply_tracked(
    &self,
    cluster: &str,
    mut object: serde_json::Value,
    component: Option<&str>,
  ) -> Result<serde_json::Value, StepError> {
    default_namespace(&mut object, &self.namespace);

    let key = ObjectKey::from_object(&object)?;
    let resource = ResourceRef::new(cluster, key);
    // Track before applying so a crash between the two never leaks an object.
    self
      .keeper
      .track(
        &self.app_name,
        self.revision.revision,
        &resource,
        component,
        self.keep_legacy_resource,
      )
      .await?;
    let client = self.clusters.client(&resource.cluster)?;
    Ok(client.apply(object).await?)
  }
}
