use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use vela_config::Application;

use crate::{ApplicationRevision, Error, Store};

/// SHA-256 of the canonical JSON form of an application spec.
pub fn spec_hash(application: &Application) -> Result<String, Error> {
  let bytes = serde_json::to_vec(application)?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Numbers and deduplicates application revisions.
#[derive(Clone)]
pub struct RevisionStore {
  store: Arc<dyn Store>,
}

impl RevisionStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  /// Return the revision for this spec, creating `<app>-v<N+1>` when no
  /// existing revision has the same hash. The flag is true if one was created.
  #[instrument(name = "ensure_revision", skip(self, application), fields(app = %application.name))]
  pub async fn ensure(&self, application: &Application) -> Result<(ApplicationRevision, bool), Error> {
    let hash = spec_hash(application)?;

    loop {
      let existing = self.store.list_revisions(&application.name).await?;
      if let Some(found) = existing.iter().rev().find(|r| r.hash == hash) {
        return Ok((found.clone(), false));
      }

      let next = existing.last().map(|r| r.revision + 1).unwrap_or(1);
      let revision = ApplicationRevision {
        app_name: application.name.clone(),
        revision: next,
        name: ApplicationRevision::revision_name(&application.name, next),
        hash: hash.clone(),
        application: application.clone(),
        created_at: Utc::now(),
      };

      match self.store.create_revision(&revision).await {
        Ok(()) => {
          info!(revision = %revision.name, hash = %hash, "revision_created");
          return Ok((revision, true));
        }
        // Lost the race for this number; re-read and try the next one.
        Err(Error::AlreadyExists(_)) => continue,
        Err(err) => return Err(err),
      }
    }
  }

  pub async fn get(&self, app_name: &str, revision: u64) -> Result<ApplicationRevision, Error> {
    self.store.get_revision(app_name, revision).await
  }

  pub async fn latest(&self, app_name: &str) -> Result<Option<ApplicationRevision>, Error> {
    Ok(self.store.list_revisions(app_name).await?.pop())
  }

  pub async fn list(&self, app_name: &str) -> Result<Vec<ApplicationRevision>, Error> {
    self.store.list_revisions(app_name).await
  }
}
