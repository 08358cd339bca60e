//! The rendering boundary.
//!
//! A [`Renderer`] is a pure function from a component (with its traits) to
//! resource documents. The engine treats its output as opaque and submits it
//! to the cluster as-is.

use minijinja::{Environment, Value};
use serde_json::{Map, json};
use thiserror::Error;
use vela_config::{ComponentDef, TraitDef};

use crate::resource::default_namespace;

/// Labels stamped on every rendered object.
pub mod labels {
  pub const APP_NAME: &str = "app.oam.dev/name";
  pub const COMPONENT: &str = "app.oam.dev/component";
  pub const APP_REVISION: &str = "app.oam.dev/appRevision";
}

#[derive(Debug, Error)]
pub enum RenderError {
  #[error("component '{component}' has unknown type '{component_type}'")]
  UnknownComponentType {
    component: String,
    component_type: String,
  },

  #[error("component '{component}' has unknown trait '{trait_type}'")]
  UnknownTraitType { component: String, trait_type: String },

  #[error("invalid properties for component '{component}': {message}")]
  InvalidProperties { component: String, message: String },

  #[error("failed to render template for component '{component}': {message}")]
  Template { component: String, message: String },
}

/// Values available to templates as `context`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
  pub app_name: String,
  pub namespace: String,
  pub revision_name: String,
}

/// Turns a component into resource documents.
pub trait Renderer: Send + Sync {
  fn render(
    &self,
    component: &ComponentDef,
    ctx: &RenderContext,
  ) -> Result<Vec<serde_json::Value>, RenderError>;
}

/// Renderer with builtin component types and minijinja templating.
///
/// Component types:
/// - `webservice`: a Deployment plus a Service when ports are declared
/// - `worker`: a Deployment
/// - `raw`: `properties` (or `properties.objects`) are the objects; string
///   values are rendered as templates against `{ context, parameter }`
///
/// Trait types: `scaler`, `labels`, `annotations`, `expose`.
pub struct TemplateRenderer {
  env: Environment<'static>,
}

impl Default for TemplateRenderer {
  fn default() -> Self {
    Self::new()
  }
}

impl TemplateRenderer {
  pub fn new() -> Self {
    Self {
      env: Environment::new(),
    }
  }

  fn deployment(
    &self,
    component: &ComponentDef,
    ctx: &RenderContext,
  ) -> Result<serde_json::Value, RenderError> {
    let props = &component.properties;
    let image = props
      .get("image")
      .and_then(|v| v.as_str())
      .ok_or_else(|| RenderError::InvalidProperties {
        component: component.name.clone(),
        message: "missing string property 'image'".to_string(),
      })?;
    let replicas = props.get("replicas").and_then(|v| v.as_u64()).unwrap_or(1);

    let mut container = json!({ "name": component.name, "image": image });
    let ports = container_ports(props);
    if !ports.is_empty() {
      container["ports"] = json!(
        ports
          .iter()
          .map(|p| json!({ "containerPort": p }))
          .collect::<Vec<_>>()
      );
    }
    for field in ["cmd", "env"] {
      if let Some(value) = props.get(field) {
        let key = if field == "cmd" { "command" } else { field };
        container[key] = value.clone();
      }
    }

    Ok(json!({
      "apiVersion": "apps/v1",
      "kind": "Deployment",
      "metadata": { "name": component.name, "namespace": ctx.namespace },
      "spec": {
        "replicas": replicas,
        "selector": { "matchLabels": { (labels::COMPONENT): component.name } },
        "template": {
          "metadata": { "labels": { (labels::COMPONENT): component.name } },
          "spec": { "containers": [container] }
        }
      }
    }))
  }

  fn raw(
    &self,
    component: &ComponentDef,
    ctx: &RenderContext,
  ) -> Result<Vec<serde_json::Value>, RenderError> {
    let template_ctx = Value::from_serialize(json!({
      "context": { "name": component.name, "appName": ctx.app_name, "namespace": ctx.namespace, "revisionName": ctx.revision_name },
      "parameter": component.properties,
    }));

    let sources = match component.properties.get("objects").and_then(|v| v.as_array()) {
      Some(objects) => objects.clone(),
      None => vec![component.properties.clone()],
    };
    sources
      .iter()
      .map(|source| self.render_value(source, &template_ctx, &component.name))
      .collect()
  }

  /// Render every templated string leaf of a value.
  fn render_value(
    &self,
    value: &serde_json::Value,
    ctx: &Value,
    component: &str,
  ) -> Result<serde_json::Value, RenderError> {
    match value {
      serde_json::Value::String(s) if s.contains("{{") || s.contains("{%") => self
        .env
        .render_str(s, ctx.clone())
        .map(serde_json::Value::String)
        .map_err(|e| RenderError::Template {
          component: component.to_string(),
          message: e.to_string(),
        }),
      serde_json::Value::Array(items) => items
        .iter()
        .map(|item| self.render_value(item, ctx, component))
        .collect::<Result<Vec<_>, _>>()
        .map(serde_json::Value::Array),
      serde_json::Value::Object(map) => {
        let mut rendered = Map::new();
        for (k, v) in map {
          rendered.insert(k.clone(), self.render_value(v, ctx, component)?);
        }
        Ok(serde_json::Value::Object(rendered))
      }
      other => Ok(other.clone()),
    }
  }

  fn apply_trait(
    &self,
    component: &ComponentDef,
    ctx: &RenderContext,
    trait_def: &TraitDef,
    objects: &mut Vec<serde_json::Value>,
  ) -> Result<(), RenderError> {
    let props = &trait_def.properties;
    match trait_def.trait_type.as_str() {
      "scaler" => {
        let replicas = props
          .get("replicas")
          .and_then(|v| v.as_u64())
          .ok_or_else(|| RenderError::InvalidProperties {
            component: component.name.clone(),
            message: "scaler trait requires integer 'replicas'".to_string(),
          })?;
        if let Some(workload) = objects.first_mut() {
          workload["spec"]["replicas"] = json!(replicas);
        }
      }
      "labels" | "annotations" => {
        let field = trait_def.trait_type.as_str();
        let entries = props.as_object().cloned().unwrap_or_default();
        for object in objects.iter_mut() {
          let metadata = &mut object["metadata"];
          if !metadata[field].is_object() {
            metadata[field] = json!({});
          }
          for (k, v) in &entries {
            metadata[field][k] = v.clone();
          }
        }
      }
      "expose" => {
        let ports = container_ports(props);
        if ports.is_empty() {
          return Err(RenderError::InvalidProperties {
            component: component.name.clone(),
            message: "expose trait requires 'port' or 'ports'".to_string(),
          });
        }
        objects.retain(|o| !(o["kind"] == "Service" && o["metadata"]["name"] == component.name));
        objects.push(service(&component.name, &ctx.namespace, &ports));
      }
      other => {
        return Err(RenderError::UnknownTraitType {
          component: component.name.clone(),
          trait_type: other.to_string(),
        });
      }
    }
    Ok(())
  }
}

impl Renderer for TemplateRenderer {
  fn render(
    &self,
    component: &ComponentDef,
    ctx: &RenderContext,
  ) -> Result<Vec<serde_json::Value>, RenderError> {
    let mut objects = match component.component_type.as_str() {
      "webservice" => {
        let mut objects = vec![self.deployment(component, ctx)?];
        let ports = container_ports(&component.properties);
        if !ports.is_empty() {
          objects.push(service(&component.name, &ctx.namespace, &ports));
        }
        objects
      }
      "worker" => vec![self.deployment(component, ctx)?],
      "raw" => self.raw(component, ctx)?,
      other => {
        return Err(RenderError::UnknownComponentType {
          component: component.name.clone(),
          component_type: other.to_string(),
        });
      }
    };

    for trait_def in &component.traits {
      self.apply_trait(component, ctx, trait_def, &mut objects)?;
    }

    for object in objects.iter_mut() {
      stamp(object, component, ctx);
    }
    Ok(objects)
  }
}

fn container_ports(props: &serde_json::Value) -> Vec<u64> {
  if let Some(port) = props.get("port").and_then(|v| v.as_u64()) {
    return vec![port];
  }
  props
    .get("ports")
    .and_then(|v| v.as_array())
    .map(|ports| {
      ports
        .iter()
        .filter_map(|p| p.as_u64().or_else(|| p.get("port").and_then(|v| v.as_u64())))
        .collect()
    })
    .unwrap_or_default()
}

fn service(name: &str, namespace: &str, ports: &[u64]) -> serde_json::Value {
  json!({
    "apiVersion": "v1",
    "kind": "Service",
    "metadata": { "name": name, "namespace": namespace },
    "spec": {
      "selector": { (labels::COMPONENT): name },
      "ports": ports.iter().map(|p| json!({ "port": p, "targetPort": p })).collect::<Vec<_>>()
    }
  })
}

/// Default the namespace of namespaced kinds and add ownership labels.
fn stamp(object: &mut serde_json::Value, component: &ComponentDef, ctx: &RenderContext) {
  if !object["metadata"].is_object() {
    object["metadata"] = json!({});
  }
  default_namespace(object, &ctx.namespace);
  let metadata = &mut object["metadata"];
  if !metadata["labels"].is_object() {
    metadata["labels"] = json!({});
  }
  metadata["labels"][labels::APP_NAME] = json!(ctx.app_name);
  metadata["labels"][labels::COMPONENT] = json!(component.name);
  metadata["labels"][labels::APP_REVISION] = json!(ctx.revision_name);
}
