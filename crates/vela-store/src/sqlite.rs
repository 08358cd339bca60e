use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use vela_cluster::ResourceRef;
use vela_config::Application;

use crate::{
  ApplicationRevision, ApplicationStatus, CasResult, Error, ManagedResource, ResourceTracker,
  Store, StoredApplication, TrackerKey,
};

#[derive(FromRow)]
struct ApplicationRow {
  application: Json<Application>,
  status: Json<ApplicationStatus>,
  version: i64,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl From<ApplicationRow> for StoredApplication {
  fn from(row: ApplicationRow) -> Self {
    Self {
      application: row.application.0,
      status: row.status.0,
      version: row.version as u64,
      created_at: row.created_at,
      updated_at: row.updated_at,
    }
  }
}

#[derive(FromRow)]
struct RevisionRow {
  app_name: String,
  revision: i64,
  name: String,
  hash: String,
  application: Json<Application>,
  created_at: DateTime<Utc>,
}

impl From<RevisionRow> for ApplicationRevision {
  fn from(row: RevisionRow) -> Self {
    Self {
      app_name: row.app_name,
      revision: row.revision as u64,
      name: row.name,
      hash: row.hash,
      application: row.application.0,
      created_at: row.created_at,
    }
  }
}

#[derive(FromRow)]
struct TrackerRow {
  app_name: String,
  revision: i64,
  cluster: String,
  namespace: String,
  keep_legacy_resource: bool,
  created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct TrackedResourceRow {
  revision: i64,
  cluster: String,
  namespace: String,
  resource: Json<ResourceRef>,
  component: Option<String>,
}

const SELECT_APPLICATION: &str = r#"
  SELECT application, status, version, created_at, updated_at
  FROM applications
"#;

const SELECT_REVISION: &str = r#"
  SELECT app_name, revision, name, hash, application, created_at
  FROM revisions
"#;

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `path` and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }

  async fn compare_and_set(
    &self,
    name: &str,
    column_sql: &str,
    payload: String,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    let sql = format!(
      "UPDATE applications SET {} = ?, version = version + 1, updated_at = ? WHERE name = ? AND version = ?",
      column_sql
    );
    let result = sqlx::query(&sql)
      .bind(payload)
      .bind(Utc::now())
      .bind(name)
      .bind(expected_version as i64)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 1 {
      return Ok(CasResult::Success {
        version: expected_version + 1,
      });
    }

    let actual: Option<(i64,)> = sqlx::query_as("SELECT version FROM applications WHERE name = ?")
      .bind(name)
      .fetch_optional(&self.pool)
      .await?;
    Ok(match actual {
      Some((version,)) => CasResult::VersionConflict {
        actual: version as u64,
      },
      None => CasResult::NotFound,
    })
  }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_application(&self, application: &Application) -> Result<StoredApplication, Error> {
    let now = Utc::now();
    let stored = StoredApplication {
      application: application.clone(),
      status: ApplicationStatus::default(),
      version: 1,
      created_at: now,
      updated_at: now,
    };

    sqlx::query(
      r#"
      INSERT INTO applications (name, application, status, version, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&application.name)
    .bind(Json(&stored.application))
    .bind(Json(&stored.status))
    .bind(stored.version as i64)
    .bind(stored.created_at)
    .bind(stored.updated_at)
    .execute(&self.pool)
    .await
    .map_err(|err| {
      if is_unique_violation(&err) {
        Error::AlreadyExists(application.name.clone())
      } else {
        Error::Database(err)
      }
    })?;

    Ok(stored)
  }

  async fn get_application(&self, name: &str) -> Result<StoredApplication, Error> {
    let row: Option<ApplicationRow> = sqlx::query_as(&format!("{} WHERE name = ?", SELECT_APPLICATION))
      .bind(name)
      .fetch_optional(&self.pool)
      .await?;
    row
      .map(StoredApplication::from)
      .ok_or_else(|| Error::NotFound(format!("application {}", name)))
  }

  async fn list_applications(&self) -> Result<Vec<StoredApplication>, Error> {
    let rows: Vec<ApplicationRow> = sqlx::query_as(&format!("{} ORDER BY name ASC", SELECT_APPLICATION))
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.into_iter().map(StoredApplication::from).collect())
  }

  async fn update_application(
    &self,
    application: &Application,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    let payload = serde_json::to_string(application)?;
    self
      .compare_and_set(&application.name, "application", payload, expected_version)
      .await
  }

  async fn update_status(
    &self,
    name: &str,
    status: &ApplicationStatus,
    expected_version: u64,
  ) -> Result<CasResult, Error> {
    let payload = serde_json::to_string(status)?;
    self
      .compare_and_set(name, "status", payload, expected_version)
      .await
  }

  async fn delete_application(&self, name: &str) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM applications WHERE name = ?")
      .bind(name)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn create_revision(&self, revision: &ApplicationRevision) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO revisions (app_name, revision, name, hash, application, created_at)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&revision.app_name)
    .bind(revision.revision as i64)
    .bind(&revision.name)
    .bind(&revision.hash)
    .bind(Json(&revision.application))
    .bind(revision.created_at)
    .execute(&self.pool)
    .await
    .map_err(|err| {
      if is_unique_violation(&err) {
        Error::AlreadyExists(revision.name.clone())
      } else {
        Error::Database(err)
      }
    })?;

    Ok(())
  }

  async fn get_revision(&self, app_name: &str, revision: u64) -> Result<ApplicationRevision, Error> {
    let row: Option<RevisionRow> =
      sqlx::query_as(&format!("{} WHERE app_name = ? AND revision = ?", SELECT_REVISION))
        .bind(app_name)
        .bind(revision as i64)
        .fetch_optional(&self.pool)
        .await?;
    row.map(ApplicationRevision::from).ok_or_else(|| {
      Error::NotFound(format!(
        "revision {}",
        ApplicationRevision::revision_name(app_name, revision)
      ))
    })
  }

  async fn list_revisions(&self, app_name: &str) -> Result<Vec<ApplicationRevision>, Error> {
    let rows: Vec<RevisionRow> =
      sqlx::query_as(&format!("{} WHERE app_name = ? ORDER BY revision ASC", SELECT_REVISION))
        .bind(app_name)
        .fetch_all(&self.pool)
        .await?;
    Ok(rows.into_iter().map(ApplicationRevision::from).collect())
  }

  async fn delete_revision(&self, app_name: &str, revision: u64) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM revisions WHERE app_name = ? AND revision = ?")
      .bind(app_name)
      .bind(revision as i64)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn track_resource(
    &self,
    key: &TrackerKey,
    keep_legacy_resource: bool,
    resource: &ManagedResource,
  ) -> Result<bool, Error> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
      INSERT OR IGNORE INTO resource_trackers
        (app_name, revision, cluster, namespace, keep_legacy_resource, created_at)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&key.app_name)
    .bind(key.revision as i64)
    .bind(&key.cluster)
    .bind(&key.namespace)
    .bind(keep_legacy_resource)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
      r#"
      INSERT OR IGNORE INTO tracked_resources
        (app_name, revision, cluster, namespace, identity, resource, component)
      VALUES (?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&key.app_name)
    .bind(key.revision as i64)
    .bind(&key.cluster)
    .bind(&key.namespace)
    .bind(resource.identity())
    .bind(Json(&resource.resource))
    .bind(&resource.component)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected() == 1)
  }

  async fn remove_tracked_resource(&self, key: &TrackerKey, identity: &str) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      DELETE FROM tracked_resources
      WHERE app_name = ? AND revision = ? AND cluster = ? AND namespace = ? AND identity = ?
      "#,
    )
    .bind(&key.app_name)
    .bind(key.revision as i64)
    .bind(&key.cluster)
    .bind(&key.namespace)
    .bind(identity)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn list_trackers(&self, app_name: &str) -> Result<Vec<ResourceTracker>, Error> {
    let trackers: Vec<TrackerRow> = sqlx::query_as(
      r#"
      SELECT app_name, revision, cluster, namespace, keep_legacy_resource, created_at
      FROM resource_trackers
      WHERE app_name = ?
      ORDER BY revision ASC, cluster ASC, namespace ASC
      "#,
    )
    .bind(app_name)
    .fetch_all(&self.pool)
    .await?;

    let entries: Vec<TrackedResourceRow> = sqlx::query_as(
      r#"
      SELECT revision, cluster, namespace, resource, component
      FROM tracked_resources
      WHERE app_name = ?
      ORDER BY rowid ASC
      "#,
    )
    .bind(app_name)
    .fetch_all(&self.pool)
    .await?;

    let mut grouped: BTreeMap<(i64, String, String), Vec<ManagedResource>> = BTreeMap::new();
    for entry in entries {
      grouped
        .entry((entry.revision, entry.cluster, entry.namespace))
        .or_default()
        .push(ManagedResource {
          resource: entry.resource.0,
          component: entry.component,
        });
    }

    Ok(
      trackers
        .into_iter()
        .map(|row| {
          let resources = grouped
            .remove(&(row.revision, row.cluster.clone(), row.namespace.clone()))
            .unwrap_or_default();
          ResourceTracker {
            key: TrackerKey {
              app_name: row.app_name,
              revision: row.revision as u64,
              cluster: row.cluster,
              namespace: row.namespace,
            },
            keep_legacy_resource: row.keep_legacy_resource,
            resources,
            created_at: row.created_at,
          }
        })
        .collect(),
    )
  }

  async fn delete_tracker(&self, key: &TrackerKey) -> Result<bool, Error> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
      DELETE FROM tracked_resources
      WHERE app_name = ? AND revision = ? AND cluster = ? AND namespace = ?
      "#,
    )
    .bind(&key.app_name)
    .bind(key.revision as i64)
    .bind(&key.cluster)
    .bind(&key.namespace)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
      r#"
      DELETE FROM resource_trackers
      WHERE app_name = ? AND revision = ? AND cluster = ? AND namespace = ?
      "#,
    )
    .bind(&key.app_name)
    .bind(key.revision as i64)
    .bind(&key.cluster)
    .bind(&key.namespace)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
  }
}
