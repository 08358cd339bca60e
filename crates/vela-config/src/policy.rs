use serde::{Deserialize, Serialize};

/// Policy type carrying the [`GcPolicy`].
pub const POLICY_GARBAGE_COLLECT: &str = "garbage-collect";

/// Policy type carrying a rollout plan.
pub const POLICY_ROLLOUT: &str = "rollout";

fn default_true() -> bool {
  true
}

/// Garbage-collection policy of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcPolicy {
  /// Retain resources of superseded revisions instead of sweeping them.
  #[serde(default)]
  pub keep_legacy_resource: bool,
  /// Protect the revision that was current before the latest one. When
  /// false, a sweep keeps only the latest revision.
  #[serde(default = "default_true")]
  pub keep_previous_revision: bool,
  #[serde(default)]
  pub order: GcOrder,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub rules: Vec<GcRule>,
}

impl Default for GcPolicy {
  fn default() -> Self {
    Self {
      keep_legacy_resource: false,
      keep_previous_revision: true,
      order: GcOrder::default(),
      rules: Vec::new(),
    }
  }
}

impl GcPolicy {
  /// Strategy for a resource; the first matching rule wins.
  pub fn strategy_for(&self, component: Option<&str>, kind: &str) -> GcStrategy {
    self
      .rules
      .iter()
      .find(|rule| rule.selector.matches(component, kind))
      .map(|rule| rule.strategy)
      .unwrap_or_default()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcRule {
  pub selector: GcSelector,
  #[serde(default)]
  pub strategy: GcStrategy,
}

/// Selects resources by owning component and/or kind.
///
/// Every non-empty criterion must match; a selector without criteria matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcSelector {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub component_names: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub resource_kinds: Vec<String>,
}

impl GcSelector {
  pub fn matches(&self, component: Option<&str>, kind: &str) -> bool {
    if self.component_names.is_empty() && self.resource_kinds.is_empty() {
      return false;
    }
    let component_ok = self.component_names.is_empty()
      || component.is_some_and(|c| self.component_names.iter().any(|n| n == c));
    let kind_ok = self.resource_kinds.is_empty() || self.resource_kinds.iter().any(|k| k == kind);
    component_ok && kind_ok
  }
}

/// Order in which the resources of one tracker are deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GcOrder {
  #[default]
  Unordered,
  /// A component's resources go only after the components depending on it
  /// (through `dependsOn` or inputs bound to its outputs) are gone.
  Dependency,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GcStrategy {
  /// Collected once the owning revision is superseded.
  #[default]
  OnAppUpdate,
  /// Kept across revisions, collected when the application is deleted.
  OnAppDelete,
  /// Never deleted by the garbage collector.
  Never,
}
