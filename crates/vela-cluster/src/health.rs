//! Readiness of live objects.

/// Whether an object reports itself ready.
///
/// Objects with `spec.replicas` are healthy once `status.readyReplicas`
/// reaches it; objects with a boolean `status.ready` use that; anything else
/// is healthy as soon as it exists.
pub fn is_healthy(object: &serde_json::Value) -> bool {
  if let Some(desired) = object.pointer("/spec/replicas").and_then(|v| v.as_u64()) {
    let ready = object
      .pointer("/status/readyReplicas")
      .and_then(|v| v.as_u64())
      .unwrap_or(0);
    return ready >= desired;
  }
  object
    .pointer("/status/ready")
    .and_then(|v| v.as_bool())
    .unwrap_or(true)
}

/// Human-readable readiness summary.
pub fn health_message(object: &serde_json::Value) -> String {
  match object.pointer("/spec/replicas").and_then(|v| v.as_u64()) {
    Some(desired) => {
      let ready = object
        .pointer("/status/readyReplicas")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
      format!("ready {}/{}", ready, desired)
    }
    None if is_healthy(object) => "ready".to_string(),
    None => "not ready".to_string(),
  }
}
