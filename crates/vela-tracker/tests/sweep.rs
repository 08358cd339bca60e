use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use vela_cluster::{ClusterClient, ClusterContext, InMemoryCluster, ObjectKey, ResourceRef};
use vela_config::Application;
use vela_store::{
  ApplicationRevision, ApplicationStatus, CasResult, MemoryStore, RevisionRef, Store,
};
use vela_tracker::{GarbageCollector, ResourceKeeper};

struct Fixture {
  store: Arc<MemoryStore>,
  cluster: Arc<InMemoryCluster>,
  keeper: ResourceKeeper,
  gc: GarbageCollector,
}

impl Fixture {
  fn new() -> Self {
    let store = Arc::new(MemoryStore::new());
    let cluster = Arc::new(InMemoryCluster::new());
    let clusters = ClusterContext::local(cluster.clone());
    Self {
      keeper: ResourceKeeper::new(store.clone()),
      gc: GarbageCollector::new(store.clone(), clusters, 10),
      store,
      cluster,
    }
  }

  async fn create_app(&self, policies: serde_json::Value) {
    self
      .create_app_with(
        json!([{ "name": "web", "type": "webservice", "properties": { "image": "nginx" } }]),
        policies,
      )
      .await;
  }

  async fn create_app_with(&self, components: serde_json::Value, policies: serde_json::Value) {
    let app: Application = serde_json::from_value(json!({
      "name": "demo",
      "components": components,
      "policies": policies,
    }))
    .unwrap();
    self.store.create_application(&app).await.unwrap();
  }

  /// `api` reads an output of `db`; `web` depends on `api`.
  async fn create_layered_app(&self, properties: serde_json::Value) {
    self
      .create_app_with(
        json!([
          { "name": "db", "type": "raw", "outputs": [{ "name": "dbHost", "valueFrom": "output.resources[0]" }] },
          { "name": "api", "type": "raw", "inputs": [{ "from": "dbHost", "parameterKey": "data.host" }] },
          { "name": "web", "type": "raw", "dependsOn": ["api"] }
        ]),
        json!([{ "name": "gc", "type": "garbage-collect", "properties": properties }]),
      )
      .await;
  }

  /// Apply and track a deployment for a revision.
  async fn deploy(&self, revision: u64, name: &str, component: &str, keep_legacy: bool) -> ObjectKey {
    let key = ObjectKey::new("apps/v1", "Deployment", "default", name);
    self
      .cluster
      .apply(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": "default" },
      }))
      .await
      .unwrap();
    self
      .keeper
      .track(
        "demo",
        revision,
        &ResourceRef::new("local", key.clone()),
        Some(component),
        keep_legacy,
      )
      .await
      .unwrap();
    key
  }

  async fn set_revisions(&self, current: u64, previous: Option<u64>) {
    let rev = |n: u64| RevisionRef {
      name: format!("demo-v{}", n),
      revision: n,
      hash: format!("h{}", n),
    };
    let stored = self.store.get_application("demo").await.unwrap();
    let status = ApplicationStatus {
      latest_revision: Some(rev(current)),
      previous_revision: previous.map(rev),
      ..ApplicationStatus::default()
    };
    let result = self
      .store
      .update_status("demo", &status, stored.version)
      .await
      .unwrap();
    assert!(matches!(result, CasResult::Success { .. }));
  }
}

#[tokio::test]
async fn test_sweep_removes_old_revision_resources() {
  let fx = Fixture::new();
  fx.create_app(json!([])).await;

  let old = fx.deploy(1, "web-old", "web", false).await;
  let shared = fx.deploy(1, "shared", "web", false).await;
  fx.deploy(2, "shared", "web", false).await;
  fx.deploy(2, "web-new", "web", false).await;
  let newest = fx.deploy(3, "web-newest", "web", false).await;
  fx.deploy(3, "shared", "web", false).await;
  fx.set_revisions(3, Some(2)).await;

  let report = fx.gc.sweep("demo").await.unwrap();

  assert_eq!(report.kept_revisions, vec![2, 3]);
  assert!(!fx.cluster.contains(&old));
  assert!(fx.cluster.contains(&shared));
  assert!(fx.cluster.contains(&newest));
  assert_eq!(report.deleted.len(), 1);
  assert_eq!(report.released.len(), 1);
  assert_eq!(report.trackers_removed, 1);

  let revisions: Vec<u64> = fx
    .store
    .list_trackers("demo")
    .await
    .unwrap()
    .iter()
    .map(|t| t.key.revision)
    .collect();
  assert_eq!(revisions, vec![2, 3]);
}

#[tokio::test]
async fn test_sweep_never_touches_previous_revision() {
  let fx = Fixture::new();
  fx.create_app(json!([])).await;

  let v1 = fx.deploy(1, "web-v1", "web", false).await;
  fx.deploy(2, "web-v2", "web", false).await;
  fx.set_revisions(2, Some(1)).await;

  let report = fx.gc.sweep("demo").await.unwrap();
  assert!(report.deleted.is_empty());
  assert!(fx.cluster.contains(&v1));
}

#[tokio::test]
async fn test_previous_revision_released_when_policy_allows() {
  let fx = Fixture::new();
  fx.create_app(json!([{
    "name": "gc",
    "type": "garbage-collect",
    "properties": { "keepPreviousRevision": false }
  }]))
  .await;

  let v1 = fx.deploy(1, "web-v1", "web", false).await;
  let shared = fx.deploy(1, "shared", "web", false).await;
  fx.deploy(2, "shared", "web", false).await;
  let v2 = fx.deploy(2, "web-v2", "web", false).await;
  fx.set_revisions(2, Some(1)).await;

  let report = fx.gc.sweep("demo").await.unwrap();

  assert_eq!(report.kept_revisions, vec![2]);
  assert!(!fx.cluster.contains(&v1));
  assert!(fx.cluster.contains(&shared));
  assert!(fx.cluster.contains(&v2));
  assert_eq!(report.trackers_removed, 1);
}

#[tokio::test]
async fn test_dependency_order_defers_until_dependents_are_gone() {
  let fx = Fixture::new();
  fx.create_layered_app(json!({ "order": "dependency", "keepPreviousRevision": false }))
    .await;

  let db = fx.deploy(1, "db", "db", false).await;
  let api = fx.deploy(1, "api", "api", false).await;
  let web = fx.deploy(1, "web", "web", false).await;
  fx.deploy(2, "web-v2", "web", false).await;
  fx.set_revisions(2, Some(1)).await;

  let report = fx.gc.sweep("demo").await.unwrap();
  assert!(!fx.cluster.contains(&web));
  assert!(fx.cluster.contains(&api));
  assert!(fx.cluster.contains(&db));
  assert_eq!(report.deferred.len(), 2);
  assert!(!report.is_complete());

  let report = fx.gc.sweep("demo").await.unwrap();
  assert!(!fx.cluster.contains(&api));
  assert!(fx.cluster.contains(&db));
  assert_eq!(report.deferred.len(), 1);

  let report = fx.gc.sweep("demo").await.unwrap();
  assert!(report.is_complete());
  assert!(!fx.cluster.contains(&db));
  assert_eq!(report.trackers_removed, 1);
}

#[tokio::test]
async fn test_finalize_in_dependency_order() {
  let fx = Fixture::new();
  fx.create_layered_app(json!({ "order": "dependency" })).await;

  let db = fx.deploy(1, "db", "db", false).await;
  let api = fx.deploy(1, "api", "api", false).await;
  fx.set_revisions(1, None).await;

  // The dependent cannot be deleted, so its dependency must stay too.
  fx.cluster.set_fail_deletes(true);
  let report = fx.gc.finalize("demo").await.unwrap();
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.deferred.len(), 1);
  assert!(fx.cluster.contains(&db));
  assert!(fx.cluster.contains(&api));

  fx.cluster.set_fail_deletes(false);
  let report = fx.gc.finalize("demo").await.unwrap();
  assert!(report.is_complete());
  assert_eq!(report.deleted.len(), 2);
  assert!(fx.cluster.is_empty());
  assert!(fx.store.list_trackers("demo").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keep_legacy_resource_survives_sweeps() {
  let fx = Fixture::new();
  fx.create_app(json!([])).await;

  let legacy = fx.deploy(1, "web-v1", "web", true).await;
  fx.deploy(2, "web-v2", "web", false).await;
  fx.deploy(3, "web-v3", "web", false).await;
  fx.set_revisions(3, Some(2)).await;

  for _ in 0..3 {
    let report = fx.gc.sweep("demo").await.unwrap();
    assert!(report.kept_revisions.contains(&1));
    assert!(report.deleted.is_empty());
  }
  assert!(fx.cluster.contains(&legacy));
}

#[tokio::test]
async fn test_failed_delete_is_retried_next_sweep() {
  let fx = Fixture::new();
  fx.create_app(json!([])).await;

  let old = fx.deploy(1, "web-v1", "web", false).await;
  fx.deploy(2, "web-v2", "web", false).await;
  fx.deploy(3, "web-v3", "web", false).await;
  fx.set_revisions(3, Some(2)).await;

  fx.cluster.set_fail_deletes(true);
  let report = fx.gc.sweep("demo").await.unwrap();
  assert_eq!(report.failed.len(), 1);
  assert!(!report.is_complete());
  assert!(fx.cluster.contains(&old));
  assert_eq!(fx.store.list_trackers("demo").await.unwrap().len(), 3);

  fx.cluster.set_fail_deletes(false);
  let report = fx.gc.sweep("demo").await.unwrap();
  assert!(report.is_complete());
  assert_eq!(report.deleted.len(), 1);
  assert!(!fx.cluster.contains(&old));
}

#[tokio::test]
async fn test_rules_retain_and_abandon() {
  let fx = Fixture::new();
  fx.create_app(json!([{
    "name": "gc",
    "type": "garbage-collect",
    "properties": {
      "rules": [
        { "selector": { "componentNames": ["db"] }, "strategy": "onAppDelete" },
        { "selector": { "componentNames": ["cache"] }, "strategy": "never" }
      ]
    }
  }]))
  .await;

  let db = fx.deploy(1, "db", "db", false).await;
  let cache = fx.deploy(1, "cache", "cache", false).await;
  fx.deploy(2, "web-v2", "web", false).await;
  fx.deploy(3, "web-v3", "web", false).await;
  fx.set_revisions(3, Some(2)).await;

  let report = fx.gc.sweep("demo").await.unwrap();
  assert_eq!(report.retained.len(), 1);
  assert_eq!(report.abandoned.len(), 1);
  assert!(fx.cluster.contains(&db));
  assert!(fx.cluster.contains(&cache));

  // The db entry keeps the revision 1 tracker alive until finalize.
  let report = fx.gc.finalize("demo").await.unwrap();
  assert!(!fx.cluster.contains(&db));
  assert!(fx.cluster.contains(&cache));
  assert_eq!(report.deleted.len(), 3);
  assert!(fx.store.list_trackers("demo").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreferenced_revisions_are_pruned_beyond_limit() {
  let store = Arc::new(MemoryStore::new());
  let cluster = Arc::new(InMemoryCluster::new());
  let gc = GarbageCollector::new(store.clone(), ClusterContext::local(cluster), 1);

  let app: Application = serde_json::from_value(json!({ "name": "demo" })).unwrap();
  store.create_application(&app).await.unwrap();
  for n in 1..=5 {
    store
      .create_revision(&ApplicationRevision {
        app_name: "demo".to_string(),
        revision: n,
        name: format!("demo-v{}", n),
        hash: format!("h{}", n),
        application: app.clone(),
        created_at: Utc::now(),
      })
      .await
      .unwrap();
  }
  let status = ApplicationStatus {
    latest_revision: Some(RevisionRef {
      name: "demo-v5".to_string(),
      revision: 5,
      hash: "h5".to_string(),
    }),
    previous_revision: Some(RevisionRef {
      name: "demo-v4".to_string(),
      revision: 4,
      hash: "h4".to_string(),
    }),
    ..ApplicationStatus::default()
  };
  store.update_status("demo", &status, 1).await.unwrap();

  let report = gc.sweep("demo").await.unwrap();
  // Revision 3 is the one unreferenced revision retained by the limit.
  assert_eq!(report.revisions_pruned, vec![1, 2]);
  let left: Vec<u64> = store
    .list_revisions("demo")
    .await
    .unwrap()
    .iter()
    .map(|r| r.revision)
    .collect();
  assert_eq!(left, vec![3, 4, 5]);
}
