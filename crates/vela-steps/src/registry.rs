use std::collections::HashMap;
use std::sync::Arc;

use crate::StepExecutor;
use crate::builtin::{
  ApplyComponentStep, ApplyObjectStep, ConditionalWaitStep, CreateConfigStep, ReadObjectStep,
  StepGroupMarker, SuspendStep, step_types,
};

/// Lookup of step executors by type name.
pub trait StepRegistry: Send + Sync {
  fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>>;

  fn contains(&self, step_type: &str) -> bool {
    self.get(step_type).is_some()
  }
}

/// Registry backed by a map, preloaded with the builtin step types.
#[derive(Clone, Default)]
pub struct StandardRegistry {
  executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl StandardRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register(step_types::APPLY_COMPONENT, Arc::new(ApplyComponentStep));
    registry.register(step_types::APPLY_OBJECT, Arc::new(ApplyObjectStep));
    registry.register(step_types::SUSPEND, Arc::new(SuspendStep));
    registry.register(step_types::STEP_GROUP, Arc::new(StepGroupMarker));
    registry.register(step_types::READ_OBJECT, Arc::new(ReadObjectStep));
    registry.register(step_types::CONDITIONAL_WAIT, Arc::new(ConditionalWaitStep));
    registry.register(step_types::CREATE_CONFIG, Arc::new(CreateConfigStep));
    registry
  }

  /// Register (or replace) the executor for a step type.
  pub fn register(&mut self, step_type: impl Into<String>, executor: Arc<dyn StepExecutor>) {
    self.executors.insert(step_type.into(), executor);
  }

  /// Registered type names, sorted.
  pub fn types(&self) -> Vec<&str> {
    let mut types: Vec<&str> = self.executors.keys().map(|k| k.as_str()).collect();
    types.sort_unstable();
    types
  }
}

impl StepRegistry for StandardRegistry {
  fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
    self.executors.get(step_type).cloned()
  }
}
