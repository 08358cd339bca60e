use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use vela_config::Application;

use crate::{
  ApplicationRevision, ApplicationStatus, CasResult, Error, ManagedResource, ResourceTracker,
  Store, StoredApplication, TrackerKey,
};

fn poison_err<T>(_: PoisonError<T>) -> Error {
  Error::Storage("lock poisoned".to_string())
}

#[derive(Default)]
struct State {
  applications: BTreeMap<String, StoredApplication>,
  revisions: HashMap<String, BTreeMap<u64, ApplicationRevision>>,
  trackers: BTreeMap<TrackerKey, ResourceTracker>,
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
  state: RwLock<State>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_application(&self, application: &Application) -> Result<StoredApplication, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    if state.applications.contains_key(&application.name) {
      return Err(Error::AlreadyExists(application.name.clone()));
    }
    let now = Utc::now();
    let stored = StoredApplication {
      application: application.clone(),
      status: ApplicationStatus::default(),
      version: 1,
      created_at: now,
      updated_at: now,
    };
    state
      .applications
      .insert(application.name.clone(), stored.clone());
    Ok(stored)
  }

  async fn get_application(&self, name: &str) -> Result<StoredApplication, Error> {
    let state = self.state.read().map_err(poison_err)?;
    state
      .applications
      .get(name)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("application {}", name)))
  }

  async fn list_applications(&self) -> Result<Vec<StoredApplication>, Error> {
    let state = self.state.read().map_err(poison_err)?;
    Ok(state.applications.values().cloned().collect())
  }

  async fn update_application(
    &self,
    application: &Application,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    let Some(stored) = state.applications.get_mut(&application.name) else {
      return Ok(CasResult::NotFound);
    };
    if stored.version != expected_version {
      return Ok(CasResult::VersionConflict {
        actual: stored.version,
      });
    }
    stored.application = application.clone();
    stored.version += 1;
    stored.updated_at = Utc::now();
    Ok(CasResult::Success {
      version: stored.version,
    })
  }

  async fn update_status(
    &self,
    name: &str,
    status: &ApplicationStatus,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    let Some(stored) = state.applications.get_mut(name) else {
      return Ok(CasResult::NotFound);
    };
    if stored.version != expected_version {
      return Ok(CasResult::VersionConflict {
        actual: stored.version,
      });
    }
    stored.status = status.clone();
    stored.version += 1;
    stored.updated_at = Utc::now();
    Ok(CasResult::Success {
      version: stored.version,
    })
  }

  async fn delete_application(&self, name: &str) -> Result<bool, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    Ok(state.applications.remove(name).is_some())
  }

  async fn create_revision(&self, revision: &ApplicationRevision) -> Result<(), Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    let revisions = state
      .revisions
      .entry(revision.app_name.clone())
      .or_default();
    if revisions.contains_key(&revision.revision) {
      return Err(Error::AlreadyExists(revision.name.clone()));
    }
    revisions.insert(revision.revision, revision.clone());
    Ok(())
  }

  async fn get_revision(&self, app_name: &str, revision: u64) -> Result<ApplicationRevision, Error> {
    let state = self.state.read().map_err(poison_err)?;
    state
      .revisions
      .get(app_name)
      .and_then(|revisions| revisions.get(&revision))
      .cloned()
      .ok_or_else(|| {
        Error::NotFound(format!(
          "revision {}",
          ApplicationRevision::revision_name(app_name, revision)
        ))
      })
  }

  async fn list_revisions(&self, app_name: &str) -> Result<Vec<ApplicationRevision>, Error> {
    let state = self.state.read().map_err(poison_err)?;
    Ok(
      state
        .revisions
        .get(app_name)
        .map(|revisions| revisions.values().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn delete_revision(&self, app_name: &str, revision: u64) -> Result<bool, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    Ok(
      state
        .revisions
        .get_mut(app_name)
        .is_some_and(|revisions| revisions.remove(&revision).is_some()),
    )
  }

  async fn track_resource(
    &self,
    key: &TrackerKey,
    keep_legacy_resource: bool,
    resource: &ManagedResource,
  ) -> Result<bool, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    let tracker = state
      .trackers
      .entry(key.clone())
      .or_insert_with(|| ResourceTracker {
        key: key.clone(),
        keep_legacy_resource,
        resources: Vec::new(),
        created_at: Utc::now(),
      });
    let identity = resource.identity();
    if tracker.resources.iter().any(|r| r.identity() == identity) {
      return Ok(false);
    }
    tracker.resources.push(resource.clone());
    Ok(true)
  }

  async fn remove_tracked_resource(&self, key: &TrackerKey, identity: &str) -> Result<bool, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    let Some(tracker) = state.trackers.get_mut(key) else {
      return Ok(false);
    };
    let before = tracker.resources.len();
    tracker.resources.retain(|r| r.identity() != identity);
    Ok(tracker.resources.len() != before)
  }

  async fn list_trackers(&self, app_name: &str) -> Result<Vec<ResourceTracker>, Error> {
    let state = self.state.read().map_err(poison_err)?;
    Ok(
      state
        .trackers
        .values()
        .filter(|t| t.key.app_name == app_name)
        .cloned()
        .collect(),
    )
  }

  async fn delete_tracker(&self, key: &TrackerKey) -> Result<bool, Error> {
    let mut state = self.state.write().map_err(poison_err)?;
    Ok(state.trackers.remove(key).is_some())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use vela_cluster::{ObjectKey, ResourceRef};

  fn app(name: &str) -> Application {
    serde_json::from_value(serde_json::json!({
      "name": name,
      "components": [{ "name": "web", "type": "webservice", "properties": { "image": "nginx" } }]
    }))
    .unwrap()
  }

  fn managed(name: &str) -> ManagedResource {
    ManagedResource {
      resource: ResourceRef::new(
        "local",
        ObjectKey::new("apps/v1", "Deployment", "default", name),
      ),
      component: Some(name.to_string()),
    }
  }

  fn key(revision: u64) -> TrackerKey {
    TrackerKey {
      app_name: "demo".to_string(),
      revision,
      cluster: "local".to_string(),
      namespace: "default".to_string(),
    }
  }

  #[tokio::test]
  async fn test_status_cas_detects_conflict() {
    let store = MemoryStore::new();
    let stored = store.create_application(&app("demo")).await.unwrap();
    assert_eq!(stored.version, 1);

    let status = ApplicationStatus::default();
    let first = store.update_status("demo", &status, 1).await.unwrap();
    assert_eq!(first, CasResult::Success { version: 2 });

    let stale = store.update_status("demo", &status, 1).await.unwrap();
    assert_eq!(stale, CasResult::VersionConflict { actual: 2 });

    let missing = store.update_status("other", &status, 1).await.unwrap();
    assert_eq!(missing, CasResult::NotFound);
  }

  #[tokio::test]
  async fn test_duplicate_application_rejected() {
    let store = MemoryStore::new();
    store.create_application(&app("demo")).await.unwrap();
    let err = store.create_application(&app("demo")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
  }

  #[tokio::test]
  async fn test_track_resource_is_idempotent() {
    let store = MemoryStore::new();
    assert!(store.track_resource(&key(1), false, &managed("web")).await.unwrap());
    assert!(!store.track_resource(&key(1), false, &managed("web")).await.unwrap());
    assert!(store.track_resource(&key(1), false, &managed("api")).await.unwrap());

    let trackers = store.list_trackers("demo").await.unwrap();
    assert_eq!(trackers.len(), 1);
    assert_eq!(trackers[0].resources.len(), 2);
    assert_eq!(trackers[0].resources[0].component.as_deref(), Some("web"));
  }

  #[tokio::test]
  async fn test_remove_tracked_resource() {
    let store = MemoryStore::new();
    let web = managed("web");
    store.track_resource(&key(1), false, &web).await.unwrap();

    assert!(store.remove_tracked_resource(&key(1), &web.identity()).await.unwrap());
    assert!(!store.remove_tracked_resource(&key(1), &web.identity()).await.unwrap());
    assert!(store.list_trackers("demo").await.unwrap()[0].resources.is_empty());
    assert!(store.delete_tracker(&key(1)).await.unwrap());
    assert!(store.list_trackers("demo").await.unwrap().is_empty());
  }
}
