use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use vela_cluster::{ClusterContext, health_message, is_healthy};
use vela_engine::WorkflowView;
use vela_store::{Error as StoreError, ManagedResource, RevisionRef, Store, StoredApplication};

use crate::QueryError;

/// Names of the builtin views.
pub mod views {
  pub const APPLICATION_STATUS: &str = "application-status";
  pub const APPLICATION_RESOURCES: &str = "application-resources";
  pub const APPLICATION_REVISIONS: &str = "application-revisions";

  pub const ALL: [&str; 3] = [APPLICATION_STATUS, APPLICATION_RESOURCES, APPLICATION_REVISIONS];
}

#[derive(Debug, Deserialize)]
struct NameParams {
  name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceParams {
  name: String,
  #[serde(default)]
  filter: ResourceFilter,
  #[serde(default)]
  with_status: bool,
}

/// Restricts `application-resources` to matching resources. Empty fields
/// match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
  #[serde(default)]
  pub cluster: Option<String>,
  #[serde(default)]
  pub cluster_namespace: Option<String>,
  #[serde(default)]
  pub components: Vec<String>,
  #[serde(default)]
  pub api_version: Option<String>,
  #[serde(default)]
  pub kind: Option<String>,
}

impl ResourceFilter {
  pub fn matches(&self, managed: &ManagedResource) -> bool {
    let resource = &managed.resource;
    let same = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);
    same(&self.cluster, &resource.cluster)
      && same(&self.cluster_namespace, &resource.key.namespace)
      && same(&self.api_version, &resource.key.api_version)
      && same(&self.kind, &resource.key.kind)
      && (self.components.is_empty()
        || managed
          .component
          .as_ref()
          .is_some_and(|c| self.components.contains(c)))
  }
}

/// Answers view queries from the store and the live clusters.
#[derive(Clone)]
pub struct QueryEngine {
  store: Arc<dyn Store>,
  clusters: ClusterContext,
}

impl QueryEngine {
  pub fn new(store: Arc<dyn Store>, clusters: ClusterContext) -> Self {
    Self { store, clusters }
  }

  /// Run a view. Never fails: errors are returned as `{"error": "..."}`.
  #[instrument(name = "query", skip(self, params), fields(view = %view))]
  pub async fn query(&self, view: &str, params: &Value) -> Value {
    match self.try_query(view, params).await {
      Ok(result) => result,
      Err(err) => {
        warn!(view = %view, error = %err, "query_failed");
        json!({ "error": err.to_string() })
      }
    }
  }

  async fn try_query(&self, view: &str, params: &Value) -> Result<Value, QueryError> {
    match view {
      views::APPLICATION_STATUS => {
        let params: NameParams = parse_params(view, params)?;
        let stored = self.application(&params.name).await?;
        Ok(json!(WorkflowView::from_stored(&stored)))
      }
      views::APPLICATION_RESOURCES => {
        let params: ResourceParams = parse_params(view, params)?;
        self.resources(&params).await
      }
      views::APPLICATION_REVISIONS => {
        let params: NameParams = parse_params(view, params)?;
        self.revisions(&params.name).await
      }
      other => Err(QueryError::UnknownView {
        view: other.to_string(),
      }),
    }
  }

  async fn application(&self, name: &str) -> Result<StoredApplication, QueryError> {
    match self.store.get_application(name).await {
      Ok(stored) => Ok(stored),
      Err(StoreError::NotFound(_)) => Err(QueryError::NotFound {
        app: name.to_string(),
      }),
      Err(err) => Err(err.into()),
    }
  }

  /// Resources tracked by the application's current revision.
  async fn resources(&self, params: &ResourceParams) -> Result<Value, QueryError> {
    let stored = self.application(&params.name).await?;
    let Some(current) = &stored.status.latest_revision else {
      return Ok(json!([]));
    };

    let trackers = self.store.list_trackers(&params.name).await?;
    let mut entries = Vec::new();
    for tracker in trackers.iter().filter(|t| t.key.revision == current.revision) {
      for managed in tracker.resources.iter().filter(|m| params.filter.matches(m)) {
        let resource = &managed.resource;
        let mut entry = json!({
          "cluster": resource.cluster,
          "apiVersion": resource.key.api_version,
          "kind": resource.key.kind,
          "namespace": resource.key.namespace,
          "name": resource.key.name,
          "revision": current.name,
        });
        if let Some(component) = &managed.component {
          entry["component"] = json!(component);
        }
        if params.with_status {
          let live = self.clusters.client(&resource.cluster)?.get(&resource.key).await?;
          match live {
            Some(object) => {
              entry["healthy"] = json!(is_healthy(&object));
              entry["message"] = json!(health_message(&object));
              entry["status"] = object.get("status").cloned().unwrap_or(Value::Null);
            }
            None => {
              entry["healthy"] = json!(false);
              entry["message"] = json!("not found");
              entry["status"] = Value::Null;
            }
          }
        }
        entries.push(entry);
      }
    }
    debug!(app = %params.name, resources = entries.len(), "resources_listed");
    Ok(Value::Array(entries))
  }

  async fn revisions(&self, name: &str) -> Result<Value, QueryError> {
    let stored = self.application(name).await?;
    let status = &stored.status;
    let is = |r: &Option<RevisionRef>, revision: u64| {
      r.as_ref().is_some_and(|r| r.revision == revision)
    };

    let revisions = self.store.list_revisions(name).await?;
    let entries: Vec<Value> = revisions
      .iter()
      .map(|rev| {
        json!({
          "name": rev.name,
          "revision": rev.revision,
          "hash": rev.hash,
          "createdAt": rev.created_at,
          "current": is(&status.latest_revision, rev.revision),
          "succeeded": is(&status.last_succeeded_revision, rev.revision),
        })
      })
      .collect();
    Ok(Value::Array(entries))
  }
}

fn parse_params<T: DeserializeOwned>(view: &str, params: &Value) -> Result<T, QueryError> {
  let params = if params.is_null() { json!({}) } else { params.clone() };
  serde_json::from_value(params).map_err(|err| QueryError::InvalidParams {
    view: view.to_string(),
    message: err.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use vela_cluster::{ObjectKey, ResourceRef};

  fn managed(kind: &str, component: Option<&str>) -> ManagedResource {
    ManagedResource {
      resource: ResourceRef::new("", ObjectKey::new("apps/v1", kind, "default", "web")),
      component: component.map(String::from),
    }
  }

  #[test]
  fn test_empty_filter_matches_everything() {
    assert!(ResourceFilter::default().matches(&managed("Deployment", None)));
  }

  #[test]
  fn test_filter_fields() {
    let filter: ResourceFilter = serde_json::from_value(json!({
      "cluster": "local",
      "kind": "Deployment",
      "components": ["web"]
    }))
    .unwrap();

    assert!(filter.matches(&managed("Deployment", Some("web"))));
    assert!(!filter.matches(&managed("Service", Some("web"))));
    assert!(!filter.matches(&managed("Deployment", Some("db"))));
    assert!(!filter.matches(&managed("Deployment", None)));
  }
}
