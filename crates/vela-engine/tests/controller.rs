use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;
use vela_cluster::{ClusterContext, InMemoryCluster, ObjectKey};
use vela_config::{Application, Settings};
use vela_engine::{Controller, ControllerError, WorkflowEngine};
use vela_steps::StandardRegistry;
use vela_store::{
  ApplicationRevision, ApplicationStatus, CasResult, Error, ManagedResource, MemoryStore,
  ResourceTracker, Store, StoredApplication, TrackerKey,
};
use vela_workflow::{AppPhase, StepPhase};

/// Bumps the stored version right before the next `n` status writes.
struct InterferingStore {
  inner: MemoryStore,
  interferences: AtomicU32,
}

#[async_trait]
impl Store for InterferingStore {
  async fn create_application(&self, application: &Application) -> Result<StoredApplication, Error> {
    self.inner.create_application(application).await
  }

  async fn get_application(&self, name: &str) -> Result<StoredApplication, Error> {
    self.inner.get_application(name).await
  }

  async fn list_applications(&self) -> Result<Vec<StoredApplication>, Error> {
    self.inner.list_applications().await
  }

  async fn update_application(
    &self,
    application: &Application,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    self.inner.update_application(application, expected_version).await
  }

  async fn update_status(
    &self,
    name: &str,
    status: &ApplicationStatus,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    let interfere = self
      .interferences
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if interfere {
      let current = self.inner.get_application(name).await?;
      self
        .inner
        .update_status(name, &current.status, current.version)
        .await?;
    }
    self.inner.update_status(name, status, expected_version).await
  }

  async fn delete_application(&self, name: &str) -> Result<bool, Error> {
    self.inner.delete_application(name).await
  }

  async fn create_revision(&self, revision: &ApplicationRevision) -> Result<(), Error> {
    self.inner.create_revision(revision).await
  }

  async fn get_revision(&self, app_name: &str, revision: u64) -> Result<ApplicationRevision, Error> {
    self.inner.get_revision(app_name, revision).await
  }

  async fn list_revisions(&self, app_name: &str) -> Result<Vec<ApplicationRevision>, Error> {
    self.inner.list_revisions(app_name).await
  }

  async fn delete_revision(&self, app_name: &str, revision: u64) -> Result<bool, Error> {
    self.inner.delete_revision(app_name, revision).await
  }

  async fn track_resource(
    &self,
    key: &TrackerKey,
    keep_legacy_resource: bool,
    resource: &ManagedResource,
  ) -> Result<bool, Error> {
    self.inner.track_resource(key, keep_legacy_resource, resource).await
  }

  async fn remove_tracked_resource(&self, key: &TrackerKey, identity: &str) -> Result<bool, Error> {
    self.inner.remove_tracked_resource(key, identity).await
  }

  async fn list_trackers(&self, app_name: &str) -> Result<Vec<ResourceTracker>, Error> {
    self.inner.list_trackers(app_name).await
  }

  async fn delete_tracker(&self, key: &TrackerKey) -> Result<bool, Error> {
    self.inner.delete_tracker(key).await
  }
}

struct Fixture {
  controller: Controller,
  store: Arc<dyn Store>,
  cluster: Arc<InMemoryCluster>,
}

impl Fixture {
  fn new() -> Self {
    Self::with_store(Arc::new(MemoryStore::new()), Settings::default())
  }

  fn with_store(store: Arc<dyn Store>, settings: Settings) -> Self {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = Arc::new(WorkflowEngine::new(
      Arc::new(StandardRegistry::with_builtins()),
      settings,
    ));
    let controller = Controller::new(store.clone(), ClusterContext::local(cluster.clone()), engine);
    Self {
      controller,
      store,
      cluster,
    }
  }
}

fn config_map(name: &str) -> ObjectKey {
  ObjectKey::new("v1", "ConfigMap", "default", name)
}

/// An application whose components are plain ConfigMaps.
fn app_with(maps: &[&str]) -> Application {
  let components: Vec<_> = maps
    .iter()
    .map(|name| {
      json!({
        "name": name,
        "type": "raw",
        "properties": {
          "apiVersion": "v1",
          "kind": "ConfigMap",
          "metadata": { "name": name },
          "data": { "owner": "shop" }
        }
      })
    })
    .collect();
  serde_json::from_value(json!({ "name": "shop", "components": components })).unwrap()
}

#[tokio::test]
async fn test_deploy_runs_default_workflow() {
  let f = Fixture::new();

  let outcome = f.controller.deploy(app_with(&["a", "b"])).await.unwrap();

  assert_eq!(outcome.phase, AppPhase::WorkflowSucceeded);
  assert!(outcome.done && outcome.written);
  assert_eq!(outcome.revision, "shop-v1");
  assert!(f.cluster.contains(&config_map("a")));
  assert!(f.cluster.contains(&config_map("b")));

  let stored = f.store.get_application("shop").await.unwrap();
  assert_eq!(stored.status.status, AppPhase::WorkflowSucceeded);
  assert_eq!(stored.status.last_succeeded_revision.unwrap().revision, 1);
  let workflow = stored.status.workflow.unwrap();
  assert_eq!(workflow.steps.len(), 2);

  let again = f.controller.reconcile("shop").await.unwrap();
  assert!(!again.written);
}

#[tokio::test]
async fn test_unhealthy_workload_keeps_run_open() {
  let f = Fixture::new();
  let app: Application = serde_json::from_value(json!({
    "name": "shop",
    "components": [{ "name": "web", "type": "webservice", "properties": { "image": "nginx", "replicas": 2 } }]
  }))
  .unwrap();

  let first = f.controller.deploy(app).await.unwrap();
  assert_eq!(first.phase, AppPhase::Running);
  assert!(!first.done);
  let stored = f.store.get_application("shop").await.unwrap();
  let step = stored.status.workflow.unwrap().steps[0].clone();
  assert_eq!(step.phase, StepPhase::Running);
  assert!(step.message.unwrap().contains("ready 0/2"));

  let deployment = ObjectKey::new("apps/v1", "Deployment", "default", "web");
  assert!(f.cluster.set_status(&deployment, json!({ "readyReplicas": 2 })));
  let second = f.controller.reconcile("shop").await.unwrap();
  assert_eq!(second.phase, AppPhase::WorkflowSucceeded);
}

#[tokio::test]
async fn test_superseded_revisions_are_swept() {
  let f = Fixture::new();

  f.controller.deploy(app_with(&["a", "b"])).await.unwrap();
  f.controller.deploy(app_with(&["b", "c"])).await.unwrap();
  // v1 is still the previous revision, so nothing of it may go yet.
  assert!(f.cluster.contains(&config_map("a")));

  let outcome = f.controller.deploy(app_with(&["c"])).await.unwrap();
  assert_eq!(outcome.revision, "shop-v3");

  assert!(!f.cluster.contains(&config_map("a")));
  assert!(f.cluster.contains(&config_map("b")));
  assert!(f.cluster.contains(&config_map("c")));

  let stored = f.store.get_application("shop").await.unwrap();
  assert_eq!(stored.status.previous_revision.unwrap().revision, 2);
  let trackers = f.store.list_trackers("shop").await.unwrap();
  assert!(trackers.iter().all(|t| t.key.revision >= 2));
}

#[tokio::test]
async fn test_policy_can_release_previous_revision() {
  let f = Fixture::new();
  let with_policy = |maps: &[&str]| {
    let mut app = app_with(maps);
    app.policies = serde_json::from_value(json!([{
      "name": "gc",
      "type": "garbage-collect",
      "properties": { "keepPreviousRevision": false }
    }]))
    .unwrap();
    app
  };

  f.controller.deploy(with_policy(&["a", "b"])).await.unwrap();
  let outcome = f.controller.deploy(with_policy(&["b", "c"])).await.unwrap();
  assert_eq!(outcome.revision, "shop-v2");
  assert_eq!(outcome.phase, AppPhase::WorkflowSucceeded);

  // Only what v1 tracked and v2 does not is gone.
  assert!(!f.cluster.contains(&config_map("a")));
  assert!(f.cluster.contains(&config_map("b")));
  assert!(f.cluster.contains(&config_map("c")));
  let trackers = f.store.list_trackers("shop").await.unwrap();
  assert!(trackers.iter().all(|t| t.key.revision == 2));
}

#[tokio::test]
async fn test_dependency_order_on_delete() {
  let f = Fixture::new();
  let mut app = app_with(&["db", "api"]);
  app.components[1].depends_on = vec!["db".to_string()];
  app.policies = serde_json::from_value(json!([{
    "name": "gc",
    "type": "garbage-collect",
    "properties": { "order": "dependency" }
  }]))
  .unwrap();
  f.controller.deploy(app).await.unwrap();

  let report = f.controller.delete("shop").await.unwrap();

  assert_eq!(report.deleted, vec!["/ConfigMap/local/default/api", "/ConfigMap/local/default/db"]);
  assert!(report.deferred.is_empty());
  assert!(f.cluster.is_empty());
}

#[tokio::test]
async fn test_unchanged_spec_reuses_revision() {
  let f = Fixture::new();

  f.controller.deploy(app_with(&["a"])).await.unwrap();
  let outcome = f.controller.deploy(app_with(&["a"])).await.unwrap();

  assert_eq!(outcome.revision, "shop-v1");
  assert_eq!(f.store.list_revisions("shop").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_conflicting_write_is_retried_from_fresh_state() {
  let store = Arc::new(InterferingStore {
    inner: MemoryStore::new(),
    interferences: AtomicU32::new(1),
  });
  let f = Fixture::with_store(store, Settings::default());

  let outcome = f.controller.deploy(app_with(&["a"])).await.unwrap();

  assert!(outcome.written);
  assert_eq!(outcome.phase, AppPhase::WorkflowSucceeded);
  let stored = f.store.get_application("shop").await.unwrap();
  assert_eq!(stored.status.status, AppPhase::WorkflowSucceeded);
}

#[tokio::test]
async fn test_conflict_retries_are_bounded() {
  let store = Arc::new(InterferingStore {
    inner: MemoryStore::new(),
    interferences: AtomicU32::new(10),
  });
  let settings = Settings {
    conflict_retries: 2,
    ..Settings::default()
  };
  let f = Fixture::with_store(store, settings);

  let err = f.controller.deploy(app_with(&["a"])).await.unwrap_err();

  assert!(matches!(
    err,
    ControllerError::ConflictRetriesExhausted { attempts: 2, .. }
  ));
}

#[tokio::test]
async fn test_delete_removes_resources_and_records() {
  let f = Fixture::new();
  f.controller.deploy(app_with(&["a", "b"])).await.unwrap();

  let report = f.controller.delete("shop").await.unwrap();

  assert_eq!(report.deleted.len(), 2);
  assert!(f.cluster.is_empty());
  assert!(matches!(
    f.store.get_application("shop").await,
    Err(Error::NotFound(_))
  ));
  assert!(f.store.list_revisions("shop").await.unwrap().is_empty());
  assert!(f.store.list_trackers("shop").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_finalize_keeps_records() {
  let f = Fixture::new();
  f.controller.deploy(app_with(&["a"])).await.unwrap();
  f.cluster.set_fail_deletes(true);

  let err = f.controller.delete("shop").await.unwrap_err();
  assert!(matches!(
    err,
    ControllerError::FinalizeIncomplete {
      failed: 1,
      deferred: 0,
      ..
    }
  ));
  assert!(f.store.get_application("shop").await.is_ok());

  f.cluster.set_fail_deletes(false);
  f.controller.delete("shop").await.unwrap();
  assert!(f.cluster.is_empty());
}

#[tokio::test]
async fn test_reconcile_missing_application() {
  let f = Fixture::new();
  let err = f.controller.reconcile("ghost").await.unwrap_err();
  assert!(matches!(err, ControllerError::NotFound { .. }));
}

#[tokio::test]
async fn test_persisted_run_resumes_in_new_process() {
  let dir = tempfile::tempdir().unwrap();
  let db = dir.path().join("vela.db");
  let app: Application = serde_json::from_value(json!({
    "name": "shop",
    "components": [{ "name": "web", "type": "worker", "properties": { "image": "nginx" } }],
    "workflow": {
      "steps": [
        { "name": "gate", "type": "suspend" },
        { "name": "web", "type": "apply-component" }
      ]
    }
  }))
  .unwrap();

  let open = |store: Arc<dyn Store>| {
    let cluster = vela_cluster::FsCluster::new(dir.path().join("cluster")).with_simulated_readiness(true);
    let engine = Arc::new(WorkflowEngine::new(
      Arc::new(StandardRegistry::with_builtins()),
      Settings::default(),
    ));
    Controller::new(store, ClusterContext::local(Arc::new(cluster)), engine)
  };

  {
    let store: Arc<dyn Store> = Arc::new(vela_store::SqliteStore::open(&db).await.unwrap());
    let outcome = open(store).deploy(app).await.unwrap();
    assert_eq!(outcome.phase, AppPhase::Suspending);
  }

  let store: Arc<dyn Store> = Arc::new(vela_store::SqliteStore::open(&db).await.unwrap());
  let operator = vela_engine::WorkflowOperator::new(store.clone(), &Settings::default());
  assert!(operator.resume("shop", None).await.unwrap());
  let outcome = open(store.clone()).reconcile("shop").await.unwrap();

  assert_eq!(outcome.phase, AppPhase::WorkflowSucceeded);
  let trackers = store.list_trackers("shop").await.unwrap();
  assert_eq!(trackers.len(), 1);
  assert!(dir.path().join("cluster/default/Deployment.apps/web.json").exists());
}
