use std::collections::{HashMap, HashSet, VecDeque};

use vela_config::{ExecutionMode, StepDef};

/// Dependency graph of one scope of steps (top-level steps or a group's sub-steps).
#[derive(Debug, Clone)]
pub struct Graph {
  /// Step names in declaration order.
  order: Vec<String>,
  /// Adjacency list: step -> list of dependent steps.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step -> list of steps it depends on.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no dependencies.
  entry_points: Vec<String>,
}

impl Graph {
  /// Build the graph for a scope.
  ///
  /// In StepByStep mode every step depends on its predecessor and `dependsOn`
  /// is ignored; in DAG mode edges come from `dependsOn` only.
  pub fn new(steps: &[StepDef], mode: ExecutionMode) -> Self {
    let order: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for name in &order {
      adjacency.entry(name.clone()).or_default();
      reverse_adjacency.entry(name.clone()).or_default();
    }

    let edges: Vec<(String, String)> = match mode {
      ExecutionMode::StepByStep => order
        .windows(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect(),
      ExecutionMode::Dag => steps
        .iter()
        .flat_map(|step| {
          step
            .depends_on
            .iter()
            .map(|dep| (dep.clone(), step.name.clone()))
        })
        .collect(),
    };

    for (from, to) in edges {
      adjacency.entry(from.clone()).or_default().push(to.clone());
      reverse_adjacency.entry(to).or_default().push(from);
    }

    let entry_points: Vec<String> = order
      .iter()
      .filter(|name| reverse_adjacency.get(*name).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    Self {
      order,
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  /// Step names in declaration order.
  pub fn steps(&self) -> &[String] {
    &self.order
  }

  /// Get entry points (steps with no dependencies).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get dependents of a step.
  pub fn downstream(&self, name: &str) -> &[String] {
    self
      .adjacency
      .get(name)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get dependencies of a step.
  pub fn upstream(&self, name: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(name)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// The step and everything that transitively depends on it.
  pub fn descendants(&self, name: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    if !self.adjacency.contains_key(name) {
      return seen;
    }
    let mut queue = VecDeque::from([name.to_string()]);
    while let Some(current) = queue.pop_front() {
      if seen.insert(current.clone()) {
        queue.extend(self.downstream(&current).iter().cloned());
      }
    }
    seen
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn step(name: &str, deps: &[&str]) -> StepDef {
    let mut step = StepDef::new(name, "apply-object");
    step.depends_on = deps.iter().map(|d| d.to_string()).collect();
    step
  }

  #[test]
  fn test_step_by_step_chains_in_order() {
    let steps = vec![step("a", &[]), step("b", &["c"]), step("c", &[])];
    let graph = Graph::new(&steps, ExecutionMode::StepByStep);

    assert_eq!(graph.entry_points(), &["a".to_string()]);
    assert_eq!(graph.upstream("b"), &["a".to_string()]);
    assert_eq!(graph.upstream("c"), &["b".to_string()]);
  }

  #[test]
  fn test_dag_uses_depends_on() {
    let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a"])];
    let graph = Graph::new(&steps, ExecutionMode::Dag);

    assert_eq!(graph.entry_points(), &["a".to_string()]);
    assert_eq!(graph.downstream("a"), &["b".to_string(), "c".to_string()]);
    assert!(graph.upstream("a").is_empty());
  }

  #[test]
  fn test_descendants() {
    let steps = vec![
      step("a", &[]),
      step("b", &["a"]),
      step("c", &["b"]),
      step("d", &[]),
    ];
    let graph = Graph::new(&steps, ExecutionMode::Dag);

    let from_b = graph.descendants("b");
    assert!(from_b.contains("b"));
    assert!(from_b.contains("c"));
    assert!(!from_b.contains("a"));
    assert!(!from_b.contains("d"));
    assert!(graph.descendants("missing").is_empty());
  }
}
