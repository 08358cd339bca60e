mod apply;
mod suspend;
mod wait;

pub use apply::{ApplyComponentStep, ApplyObjectStep, CreateConfigStep};
pub use suspend::{StepGroupMarker, SuspendStep};
pub use wait::{ConditionalWaitStep, ReadObjectStep};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use vela_cluster::ObjectKey;

use crate::{StepError, StepInvocation};

/// Builtin step type names.
pub mod step_types {
  pub const APPLY_COMPONENT: &str = "apply-component";
  pub const APPLY_OBJECT: &str = "apply-object";
  pub const SUSPEND: &str = "suspend";
  pub const STEP_GROUP: &str = vela_config::STEP_GROUP_TYPE;
  pub const READ_OBJECT: &str = "read-object";
  pub const CONDITIONAL_WAIT: &str = "conditional-wait";
  pub const CREATE_CONFIG: &str = "create-config";
}

/// Decode step properties; a step without properties decodes from `{}`.
pub(crate) fn parse_properties<T: DeserializeOwned>(step: &StepInvocation) -> Result<T, StepError> {
  let properties = if step.properties.is_null() {
    serde_json::json!({})
  } else {
    step.properties.clone()
  };
  serde_json::from_value(properties).map_err(|err| StepError::invalid(&step.name, err.to_string()))
}

/// An object addressed by step properties.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectTarget {
  pub api_version: String,
  pub kind: String,
  pub name: String,
  #[serde(default)]
  pub namespace: Option<String>,
  #[serde(default)]
  pub cluster: String,
}

impl ObjectTarget {
  pub fn key(&self, default_namespace: &str) -> ObjectKey {
    ObjectKey::new(
      &self.api_version,
      &self.kind,
      self.namespace.as_deref().unwrap_or(default_namespace),
      &self.name,
    )
  }
}
