use serde::{Deserialize, Serialize};
use vela_config::{Application, POLICY_ROLLOUT};

use crate::RolloutError;

/// How a rollout moves replicas and traffic from one revision to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPlan {
  /// Replica count at the end of the rollout. Defaults to the component's
  /// `replicas` property.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_size: Option<u32>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub rollout_batches: Vec<RolloutBatch>,
  /// Split the rollout evenly into this many batches.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub num_batches: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutBatch {
  pub replicas: BatchSize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub traffic_weight: Option<u32>,
  /// Manual gate after this batch.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pause: Option<BatchPause>,
}

/// Size of one batch: a replica count or a percentage of the total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSize {
  Count(u32),
  Percent(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPause {
  /// Resume automatically after this long.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<String>,
  /// Fail the pause if nobody resumes within this long.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<String>,
}

/// One computed batch; `replicas` and `traffic_weight` are cumulative and
/// describe the target revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStep {
  /// 1-based.
  pub index: usize,
  pub replicas: u32,
  pub traffic_weight: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pause: Option<BatchPause>,
}

impl BatchSize {
  fn resolve(&self, total: u32) -> Result<u32, RolloutError> {
    match self {
      BatchSize::Count(n) => Ok(*n),
      BatchSize::Percent(raw) => {
        let percent: u64 = raw
          .strip_suffix('%')
          .and_then(|p| p.trim().parse().ok())
          .ok_or_else(|| RolloutError::plan(format!("invalid batch size '{}'", raw)))?;
        if percent > 100 {
          return Err(RolloutError::plan(format!("batch size '{}' exceeds 100%", raw)));
        }
        Ok(ceil_div(u64::from(total) * percent, 100) as u32)
      }
    }
  }
}

impl RolloutPlan {
  /// Compute the cumulative batches for `total` replicas.
  ///
  /// The last batch always ends at `(total, 100)`.
  pub fn batches(&self, total: u32) -> Result<Vec<BatchStep>, RolloutError> {
    let mut cumulative = Vec::new();
    if !self.rollout_batches.is_empty() {
      if let Some(n) = self.num_batches {
        if n as usize != self.rollout_batches.len() {
          return Err(RolloutError::plan(format!(
            "numBatches is {} but {} rolloutBatches are declared",
            n,
            self.rollout_batches.len()
          )));
        }
      }
      let mut sum = 0u32;
      for batch in &self.rollout_batches {
        sum = sum.saturating_add(batch.replicas.resolve(total)?);
        if sum > total {
          return Err(RolloutError::plan(format!(
            "batches add up to {} replicas, more than the total of {}",
            sum, total
          )));
        }
        cumulative.push((sum, batch.traffic_weight, batch.pause.clone()));
      }
    } else if let Some(n) = self.num_batches {
      if n == 0 {
        return Err(RolloutError::plan("numBatches must be at least 1"));
      }
      for i in 1..=n {
        let replicas = ceil_div(u64::from(total) * u64::from(i), u64::from(n)) as u32;
        cumulative.push((replicas, None, None));
      }
    } else {
      cumulative.push((total, None, None));
    }

    if let Some(last) = cumulative.last_mut() {
      last.0 = total;
    }

    let count = cumulative.len();
    let mut steps = Vec::with_capacity(count);
    let mut previous_weight = 0;
    for (i, (replicas, weight, pause)) in cumulative.into_iter().enumerate() {
      let last = i + 1 == count;
      let weight = match weight {
        _ if last => 100,
        Some(w) => w,
        None => default_weight(replicas, total),
      };
      if weight > 100 {
        return Err(RolloutError::plan(format!(
          "traffic weight {} of batch {} exceeds 100",
          weight,
          i + 1
        )));
      }
      if weight < previous_weight {
        return Err(RolloutError::plan(format!(
          "traffic weight of batch {} decreases from {} to {}",
          i + 1,
          previous_weight,
          weight
        )));
      }
      previous_weight = weight;
      steps.push(BatchStep {
        index: i + 1,
        replicas,
        traffic_weight: weight,
        pause: if last { None } else { pause },
      });
    }
    Ok(steps)
  }
}

fn default_weight(replicas: u32, total: u32) -> u32 {
  if total == 0 {
    return 100;
  }
  ceil_div(100 * u64::from(replicas), u64::from(total)) as u32
}

fn ceil_div(n: u64, d: u64) -> u64 {
  n.div_ceil(d)
}

/// The `rollout` policy of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPolicy {
  /// Component whose workload is rolled out.
  pub component: String,
  #[serde(default)]
  pub plan: RolloutPlan,
}

impl RolloutPolicy {
  /// The rollout policy of an application, if it declares one.
  pub fn from_application(app: &Application) -> Result<Option<Self>, RolloutError> {
    let Some(policy) = app.policy(POLICY_ROLLOUT) else {
      return Ok(None);
    };
    serde_json::from_value(policy.properties.clone())
      .map(Some)
      .map_err(|err| RolloutError::InvalidPolicy {
        app: app.name.clone(),
        message: err.to_string(),
      })
  }

  /// Replicas at the end of the rollout: `targetSize`, else the component's
  /// `replicas` property, else 1.
  pub fn total_replicas(&self, app: &Application) -> u32 {
    self.plan.target_size.unwrap_or_else(|| {
      app
        .component(&self.component)
        .and_then(|c| c.properties.get("replicas"))
        .and_then(|v| v.as_u64())
        .map_or(1, |n| n as u32)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn plan(value: serde_json::Value) -> RolloutPlan {
    serde_json::from_value(value).unwrap()
  }

  fn shape(batches: &[BatchStep]) -> Vec<(u32, u32)> {
    batches.iter().map(|b| (b.replicas, b.traffic_weight)).collect()
  }

  #[test]
  fn test_explicit_batches_accumulate() {
    let p = plan(json!({
      "rolloutBatches": [
        { "replicas": 1, "trafficWeight": 10, "pause": { "duration": "1m" } },
        { "replicas": "50%" },
        { "replicas": 1 }
      ]
    }));
    let batches = p.batches(4).unwrap();

    assert_eq!(shape(&batches), vec![(1, 10), (3, 75), (4, 100)]);
    assert_eq!(batches[0].index, 1);
    assert!(batches[0].pause.is_some());
  }

  #[test]
  fn test_last_batch_absorbs_remainder() {
    let p = plan(json!({ "rolloutBatches": [{ "replicas": "20%" }, { "replicas": "20%" }] }));
    assert_eq!(shape(&p.batches(10).unwrap()), vec![(2, 20), (10, 100)]);
  }

  #[test]
  fn test_num_batches_split_evenly() {
    let p = plan(json!({ "numBatches": 3 }));
    assert_eq!(shape(&p.batches(5).unwrap()), vec![(2, 40), (4, 80), (5, 100)]);

    let zero = plan(json!({ "numBatches": 0 }));
    assert!(matches!(zero.batches(5), Err(RolloutError::InvalidPlan { .. })));
  }

  #[test]
  fn test_no_batches_is_single_batch() {
    let batches = RolloutPlan::default().batches(3).unwrap();
    assert_eq!(shape(&batches), vec![(3, 100)]);
    assert_eq!(shape(&RolloutPlan::default().batches(0).unwrap()), vec![(0, 100)]);
  }

  #[test]
  fn test_invalid_plans() {
    let oversized = plan(json!({ "rolloutBatches": [{ "replicas": 3 }, { "replicas": 3 }] }));
    assert!(oversized.batches(4).is_err());

    let decreasing = plan(json!({
      "rolloutBatches": [
        { "replicas": 1, "trafficWeight": 50 },
        { "replicas": 1, "trafficWeight": 20 },
        { "replicas": 1 }
      ]
    }));
    assert!(decreasing.batches(3).is_err());

    let heavy = plan(json!({ "rolloutBatches": [{ "replicas": 1, "trafficWeight": 120 }, { "replicas": 1 }] }));
    assert!(heavy.batches(2).is_err());

    let bad_percent = plan(json!({ "rolloutBatches": [{ "replicas": "lots" }] }));
    assert!(bad_percent.batches(2).is_err());
  }

  #[test]
  fn test_pause_after_last_batch_is_dropped() {
    let p = plan(json!({
      "rolloutBatches": [{ "replicas": 1 }, { "replicas": 1, "pause": {} }]
    }));
    let batches = p.batches(2).unwrap();
    assert!(batches.iter().all(|b| b.pause.is_none()));
  }

  #[test]
  fn test_total_replicas_fallbacks() {
    let app: Application = serde_json::from_value(json!({
      "name": "shop",
      "components": [{ "name": "web", "type": "webservice", "properties": { "image": "nginx", "replicas": 6 } }],
      "policies": [{ "name": "canary", "type": "rollout", "properties": { "component": "web" } }]
    }))
    .unwrap();
    let policy = RolloutPolicy::from_application(&app).unwrap().unwrap();
    assert_eq!(policy.total_replicas(&app), 6);

    let sized = RolloutPolicy {
      plan: RolloutPlan {
        target_size: Some(2),
        ..RolloutPlan::default()
      },
      ..policy
    };
    assert_eq!(sized.total_replicas(&app), 2);
  }
}
