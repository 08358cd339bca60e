use serde::{Deserialize, Serialize};

use crate::policy::{GcPolicy, POLICY_GARBAGE_COLLECT};
use crate::workflow::{InputItem, OutputItem, WorkflowDef};

fn default_namespace() -> String {
  "default".to_string()
}

/// A user-declared application: the desired state the control plane reconciles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
  pub name: String,
  #[serde(default = "default_namespace")]
  pub namespace: String,
  #[serde(default)]
  pub components: Vec<ComponentDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub policies: Vec<PolicyDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow: Option<WorkflowDef>,
}

impl Application {
  /// Get a component by name.
  pub fn component(&self, name: &str) -> Option<&ComponentDef> {
    self.components.iter().find(|c| c.name == name)
  }

  /// Get the first policy of the given type.
  pub fn policy(&self, policy_type: &str) -> Option<&PolicyDef> {
    self.policies.iter().find(|p| p.policy_type == policy_type)
  }

  /// Components that depend on `name`, either through `dependsOn` or by
  /// reading one of its outputs.
  pub fn dependents_of(&self, name: &str) -> Vec<&str> {
    let outputs: Vec<&str> = self
      .component(name)
      .map(|c| c.outputs.iter().map(|o| o.name.as_str()).collect())
      .unwrap_or_default();

    self
      .components
      .iter()
      .filter(|c| c.name != name)
      .filter(|c| {
        c.depends_on.iter().any(|d| d == name)
          || c.inputs.iter().any(|i| outputs.contains(&i.from.as_str()))
      })
      .map(|c| c.name.as_str())
      .collect()
  }

  /// The garbage-collect policy in effect, or the default policy when none is declared.
  pub fn gc_policy(&self) -> Result<GcPolicy, serde_json::Error> {
    match self.policy(POLICY_GARBAGE_COLLECT) {
      Some(policy) => serde_json::from_value(policy.properties.clone()),
      None => Ok(GcPolicy::default()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDef {
  pub name: String,
  #[serde(rename = "type")]
  pub component_type: String,
  #[serde(default)]
  pub properties: serde_json::Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub traits: Vec<TraitDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Bound into `properties` before rendering.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inputs: Vec<InputItem>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<OutputItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitDef {
  #[serde(rename = "type")]
  pub trait_type: String,
  #[serde(default)]
  pub properties: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
  pub name: String,
  #[serde(rename = "type")]
  pub policy_type: String,
  #[serde(default)]
  pub properties: serde_json::Value,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::policy::GcStrategy;
  use serde_json::json;

  #[test]
  fn test_deserialize_application_defaults() {
    let app: Application = serde_json::from_value(json!({
      "name": "web",
      "components": [
        { "name": "frontend", "type": "webservice", "properties": { "image": "nginx" } }
      ]
    }))
    .unwrap();

    assert_eq!(app.namespace, "default");
    assert!(app.workflow.is_none());
    assert_eq!(app.components[0].component_type, "webservice");
    assert!(app.component("frontend").is_some());
    assert!(app.component("backend").is_none());
  }

  #[test]
  fn test_gc_policy_default_when_absent() {
    let app: Application = serde_json::from_value(json!({ "name": "web" })).unwrap();
    let policy = app.gc_policy().unwrap();
    assert!(!policy.keep_legacy_resource);
    assert!(policy.rules.is_empty());
  }

  #[test]
  fn test_gc_policy_from_properties() {
    let app: Application = serde_json::from_value(json!({
      "name": "web",
      "policies": [{
        "name": "keep",
        "type": "garbage-collect",
        "properties": {
          "keepLegacyResource": true,
          "rules": [{ "selector": { "resourceKinds": ["PersistentVolumeClaim"] }, "strategy": "never" }]
        }
      }]
    }))
    .unwrap();

    let policy = app.gc_policy().unwrap();
    assert!(policy.keep_legacy_resource);
    assert_eq!(policy.rules[0].strategy, GcStrategy::Never);
  }

  #[test]
  fn test_dependents_of() {
    let app: Application = serde_json::from_value(json!({
      "name": "shop",
      "components": [
        { "name": "db", "type": "raw", "outputs": [{ "name": "dbHost", "valueFrom": "output.host" }] },
        { "name": "api", "type": "raw", "inputs": [{ "from": "dbHost", "parameterKey": "env.DB" }] },
        { "name": "web", "type": "raw", "dependsOn": ["api"] },
        { "name": "cron", "type": "raw" }
      ]
    }))
    .unwrap();

    assert_eq!(app.dependents_of("db"), vec!["api"]);
    assert_eq!(app.dependents_of("api"), vec!["web"]);
    assert!(app.dependents_of("web").is_empty());
    assert!(app.dependents_of("missing").is_empty());
  }
}
